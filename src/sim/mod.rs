pub mod buffs;
pub mod definitions;
pub mod game;
pub mod jobs;
pub mod modifiers;
pub mod ownership;
pub mod rehydrate;
pub mod requirements;
pub mod resources;
pub mod store;
pub mod ticker;
pub mod tokens;
