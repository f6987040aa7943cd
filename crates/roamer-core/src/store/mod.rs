// ── Directory storage ──
//
// Lock-free keyed storage with snapshot subscriptions, used for the
// access point and default gateway directories.

mod collection;

pub(crate) use collection::Directory;
