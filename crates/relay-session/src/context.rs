use relay_core::lang::LangTable;
use relay_platform::PlatformClient;
use relay_store::Store;

/// Everything a [`crate::session::Session`] needs to act, bundled so mirror
/// methods don't need a back-reference to their owning bot instance (the
/// Rust replacement for a `*Mother` pointer carried on every conversation).
pub struct MirrorContext<'a> {
    pub platform: &'a dyn PlatformClient,
    pub store: &'a dyn Store,
    pub lang: &'a LangTable,
    pub staff_channel_id: &'a str,
    pub max_file_size: u64,
}
