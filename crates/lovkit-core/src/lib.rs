// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod cascade;
pub mod chips;
pub mod combo;
pub mod highlight;
pub mod host;
pub mod ids;
pub mod layout;
pub mod lov;
pub mod model;
pub mod popup;
pub mod source;
pub mod template;

pub use cascade::*;
pub use chips::*;
pub use combo::*;
pub use host::*;
pub use ids::*;
pub use layout::*;
pub use lov::*;
pub use model::*;
pub use popup::*;
pub use source::*;
