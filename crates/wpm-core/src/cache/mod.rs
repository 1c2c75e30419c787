pub mod handles;
pub mod package_cache;
pub mod recycler;

pub use handles::{InstallerLookup, NativeHandleCache};
pub use package_cache::{CacheView, PackageCache};
pub use recycler::TaskRecycler;
