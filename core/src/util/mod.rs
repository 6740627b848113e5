pub mod fast_map;
pub mod num;
pub mod text;

#[cfg(test)]
mod num_test;
