//! Renders animated regions onto a virtual canvas, samples the canvas at every
//! LED of every placed device and streams the colours to the fixtures over UDP.
//! An audio pipeline feeds loudness, spectrum and beat signals to reactive
//! animations.

pub mod audio;
pub mod color;
pub mod config;
pub mod effects;
pub mod geometry;
pub mod graphics;
pub mod installation;
pub mod transport;
