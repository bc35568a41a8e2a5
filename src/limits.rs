use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_ASSIGNMENTS_PER_RESOURCE: usize = 100_000;
pub const MAX_CATALOG_IDS: usize = 1_000_000;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;
