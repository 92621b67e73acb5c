pub mod error;
pub mod exports;
pub mod health;
pub mod templates;

#[cfg(test)]
pub(crate) mod test_support;
