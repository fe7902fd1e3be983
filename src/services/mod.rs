// Business logic behind the addon and the web API

pub mod activity;
pub mod auth;
pub mod languages;
pub mod pagination;
pub mod votes;

// Subtitle library and resolution
pub mod delivery;
pub mod library;
pub mod matching;
pub mod selection;
pub mod storage;

// File formats
pub mod archive;
pub mod context;
pub mod convert;

// Content metadata
pub mod anime_mapping;
pub mod metadata;
pub mod tmdb;
