pub mod run;
pub mod seed;
pub mod sim;
pub mod status;
pub mod watch;

/// Split a semicolon-separated pool list, dropping blanks.
pub fn split_pools(raw: &str) -> anyhow::Result<Vec<String>> {
    let pools: Vec<String> = raw
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    anyhow::ensure!(!pools.is_empty(), "no pool names given");
    Ok(pools)
}
