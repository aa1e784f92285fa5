/// Discrete control requests consumed by the display loop.
///
/// Keyboard, unix signals and the config watcher all feed the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePower,
    NextImage,
    Reload,
    /// The configuration file changed on disk; reloaded once writes settle.
    ConfigChanged,
    /// Any unmapped input while the panel is off.
    Wake,
    Exit,
}
