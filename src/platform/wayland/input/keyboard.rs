use std::fs::File;
use std::os::fd::OwnedFd;

use wayland_client::protocol::wl_keyboard::KeymapFormat;
use xkbcommon::xkb;

// evdev KEY_ESC, used until a keymap arrives
const EVDEV_ESCAPE: u32 = 1;

pub struct Keyboard {
    pub xkb_context: xkb::Context,
    pub xkb_state: Option<xkb::State>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self {
            xkb_context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            xkb_state: None,
        }
    }

    pub fn handle_keymap(&mut self, format: KeymapFormat, fd: OwnedFd) -> anyhow::Result<()> {
        if format != KeymapFormat::XkbV1 {
            log::warn!("Unsupported keymap format: {:?}", format);
            return Ok(());
        }

        let mut file = File::from(fd);
        let keymap = xkb::Keymap::new_from_file(
            &self.xkb_context,
            &mut file,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| anyhow::anyhow!("Failed to compile XKB keymap"))?;

        self.xkb_state = Some(xkb::State::new(&keymap));
        log::debug!("Keymap loaded");
        Ok(())
    }

    pub fn handle_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) {
        if let Some(state) = self.xkb_state.as_mut() {
            state.update_mask(depressed, latched, locked, 0, 0, group);
        }
    }

    /// Whether the pressed evdev `key` is Escape under the current keymap.
    pub fn is_escape(&self, key: u32) -> bool {
        match &self.xkb_state {
            // XKB keycodes are evdev + 8
            Some(state) => state.key_get_one_sym((key + 8).into()) == xkb::Keysym::Escape,
            None => key == EVDEV_ESCAPE,
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}
