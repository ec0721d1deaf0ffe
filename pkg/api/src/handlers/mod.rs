pub mod health;
pub mod leases;
