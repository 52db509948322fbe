// Handlers module - API endpoint handlers

pub mod forward;
