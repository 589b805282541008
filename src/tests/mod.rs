// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

mod concurrency;
mod util;
