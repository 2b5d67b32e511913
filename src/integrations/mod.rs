//! External service integrations.

pub mod services {
    pub use crate::services::*;
}

pub mod providers {
    pub use crate::providers::*;
}

pub mod sheets {
    pub use crate::sheets::*;
}
