// Public (no auth) → Protected (JWT + company + user + permission)
pub mod protected;
pub mod public;
