mod impls;
mod requests;
mod responses;
mod truesight;
mod util;

pub use self::truesight::*;
pub use impls::*;
pub use requests::*;
pub use responses::*;
pub use util::*;
