/// PLY reader module.
pub mod ply;
