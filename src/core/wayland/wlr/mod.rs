//! wlroots protocols: layer shell and screencopy.

pub mod layer_shell;
pub mod screencopy;
