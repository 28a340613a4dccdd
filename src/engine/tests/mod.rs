mod classify;
mod executor;
mod tracker;
