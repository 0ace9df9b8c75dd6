pub mod architecture;
pub mod constants;
pub mod data;
pub mod inference;
pub mod loss;
pub mod training;
