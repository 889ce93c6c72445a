//! Autoscaler error types.

use poolscale_platform::{PlatformError, ProvisioningType, SessionSupport};
use thiserror::Error;

/// Invalid configuration. Nothing is written when one of these is returned.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("high and low watermarks must be supplied together")]
    IncompleteWatermarks,

    #[error("watermark {0} is outside 1..=100")]
    WatermarkRange(i64),

    #[error("low watermark {low} must be below high watermark {high}")]
    WatermarkOrder { high: u8, low: u8 },

    #[error("tag must not be empty")]
    EmptyTag,

    #[error("pool {0} is not initialized and no machine catalog was supplied")]
    CatalogRequired(String),

    #[error("configuration parameters cannot be applied to {0} pools at once")]
    MultiPoolUpdate(usize),

    #[error("catalog not found: {0}")]
    CatalogNotFound(String),

    #[error("catalog {0} contains physical machines")]
    PhysicalCatalog(String),

    #[error("catalog {catalog} uses {found:?} provisioning, expected machine creation")]
    ProvisioningType {
        catalog: String,
        found: ProvisioningType,
    },

    #[error("catalog {catalog} is {catalog_mode:?} but the pool is {pool_mode:?}")]
    SessionSupport {
        catalog: String,
        catalog_mode: SessionSupport,
        pool_mode: SessionSupport,
    },

    #[error("catalog {0} has no provisioning scheme")]
    NoProvisioningScheme(String),

    #[error("provisioning scheme not found: {0}")]
    SchemeNotFound(String),

    #[error("provisioning scheme {0} has no identity pool")]
    NoIdentityPool(String),

    #[error("identity pool not found: {0}")]
    IdentityPoolNotFound(String),

    #[error("identity pool {0} has no naming scheme")]
    NoNamingScheme(String),
}

/// Errors that abort a single pool's invocation.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("missing metadata key {0}")]
    MissingMetadata(&'static str),

    #[error("corrupt metadata {key}={value:?}: {reason}")]
    CorruptMetadata {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

pub type ScaleResult<T> = Result<T, ScaleError>;
