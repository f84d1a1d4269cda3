pub mod assignments;
pub mod classes;
pub mod core;
pub mod enrollment;
pub mod gradebook;
pub mod people;
pub mod submissions;
