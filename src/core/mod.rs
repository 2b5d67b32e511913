// Domain-layer modules and shared errors/models
pub mod pipeline {
    pub use crate::pipeline::*;
}

pub mod merger {
    pub use crate::merger::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
