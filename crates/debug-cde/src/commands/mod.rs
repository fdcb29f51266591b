pub mod debug_cde;
