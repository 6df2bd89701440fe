/**
 * SQLite-backed persistence for storage accounting.
 *  - [`SqlUsageStore`]: the usage ledger consumed by the upload and
 *    mirror paths (pending reservations, confirmed totals, writer
 *    footprints and the owned-writer graph)
 *  - [`SqlQuotas`]: per-user storage quota table
 */
mod database;
mod quotas;
mod usage;

pub use database::Database;
pub use quotas::{QuotaError, SqlQuotas};
pub use usage::SqlUsageStore;
