// Hard limits. Everything user-controlled is bounded here.

/// Max event title length in bytes.
pub const MAX_TITLE_LEN: usize = 256;

/// Max participant key length in bytes (after normalization).
pub const MAX_NAME_LEN: usize = 64;

/// Max number of day columns in one event.
pub const MAX_DAYS: i64 = 366;

/// Max participants per event.
pub const MAX_PARTICIPANTS_PER_EVENT: usize = 1024;

/// Max event id length in bytes.
pub const MAX_EVENT_ID_LEN: usize = 128;

/// Max documents held by one store engine.
pub const MAX_DOCUMENTS: usize = 100_000;

/// Max patches in a single update. A full 96-row grid over `MAX_DAYS` fits.
pub const MAX_PATCHES_PER_UPDATE: usize = 96 * MAX_DAYS as usize;

/// Max field path depth. Event documents use at most 3.
pub const MAX_PATH_DEPTH: usize = 8;
