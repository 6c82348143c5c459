pub mod deployment;
