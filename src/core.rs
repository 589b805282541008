// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

pub mod sizing;
pub mod target;
pub mod upload;
