pub mod error;
pub mod model;
#[cfg(test)]
pub mod test_util;
mod util;
