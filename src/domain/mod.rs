mod availability;
mod entry;
mod integrity;
mod money;
mod reference;
mod subscription;
mod withdrawal;

pub use availability::*;
pub use entry::*;
pub use integrity::*;
pub use money::*;
pub use reference::*;
pub use subscription::*;
pub use withdrawal::*;
