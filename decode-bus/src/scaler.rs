//! Crop/zoom through a scaling unit.
//!
//! A zoomed window is fed decoder → scaler → slot; a plain one decoder →
//! slot. The scaler group of a decoder shares its id.

use crate::{
    bus::DisplayBus,
    error::{BusError, BusResult},
    geometry::{self, Layout, Rect},
    hw::{BindSource, HwResult},
    window::WindowTable,
};

pub const MIN_CROP: u32 = 64;
pub const MAX_CROP: u32 = 8192;

/// Maps `selection`, given in screen coordinates inside `view`, onto a
/// `picture_width` x `picture_height` decoded picture.
///
/// The origin is aligned down to 4 pixels and the extents to 8, then the
/// extents are clamped to `[MIN_CROP, MAX_CROP]` and to the picture.
pub fn crop_rect(
    selection: Rect,
    view: Rect,
    picture_width: u32,
    picture_height: u32,
) -> BusResult<Rect> {
    if view.is_empty() || picture_width == 0 || picture_height == 0 {
        return Err(BusError::InvalidArgument("no picture to crop".into()));
    }
    if selection.is_empty() {
        return Err(BusError::InvalidArgument(format!(
            "empty crop selection {:?}",
            selection
        )));
    }

    let (x, width) = scale_axis(
        selection.x,
        selection.width,
        view.x,
        view.width,
        picture_width,
    );
    let (y, height) = scale_axis(
        selection.y,
        selection.height,
        view.y,
        view.height,
        picture_height,
    );
    Ok(Rect::new(x, y, width, height))
}

fn scale_axis(start: u32, len: u32, view_start: u32, view_len: u32, picture: u32) -> (u32, u32) {
    let scale = |v: u32| (v as u64 * picture as u64 / view_len as u64) as u32;
    let rel = start.saturating_sub(view_start).min(view_len);
    let len = len.min(view_len - rel);

    let max_len = (picture.min(MAX_CROP) & !7).max(picture.min(MIN_CROP));
    let len = (scale(len) & !7).clamp(MIN_CROP.min(max_len), max_len);
    let origin = (scale(rel) & !3).min((picture - len) & !3);
    (origin, len)
}

impl DisplayBus {
    /// Zooms `window` onto `selection` (screen coordinates of the single
    /// window layout), or back out with `None`. Returns the crop applied.
    pub fn set_crop(&self, window: usize, selection: Option<Rect>) -> BusResult<Option<Rect>> {
        let mut windows = self.lock_windows();
        let Some(channel) = windows.entry(window)?.owned() else {
            return Err(BusError::InvalidArgument(format!(
                "window {} has no channel",
                window
            )));
        };
        let decoder = self.decoder_of(channel);
        let live = windows.decoder_owner(decoder) == Some(channel);

        let Some(selection) = selection else {
            windows.entry_mut(window)?.crop = None;
            if live && windows.has_scaler(decoder) {
                self.zoom_out(&mut windows, window, decoder);
            }
            log::info!("window {}: zoom cleared", window);
            return Ok(None);
        };

        let Some(params) = self.channels.lock(channel)?.params else {
            return Err(BusError::InvalidArgument(format!(
                "window {} has no picture yet",
                window
            )));
        };
        let mode = self.current_mode();
        let view = geometry::layout_rects(Layout::One, mode.width, mode.height)
            .first()
            .copied()
            .unwrap_or_default();
        let crop = crop_rect(selection, view, params.width, params.height)?;
        windows.entry_mut(window)?.crop = Some(crop);

        if live {
            self.zoom_in(&mut windows, window, decoder, crop)
                .map_err(BusError::PipelineCreationFailed)?;
        }
        log::info!("window {}: zoom {:?}", window, crop);
        Ok(Some(crop))
    }

    fn zoom_in(
        &self,
        windows: &mut WindowTable,
        window: usize,
        decoder: usize,
        crop: Rect,
    ) -> HwResult<()> {
        if windows.has_scaler(decoder) {
            return self.platform.set_scaler_crop(decoder, Some(crop));
        }
        let slot = windows.slot_of(window);
        if let Some(slot) = slot {
            self.unbind_slot(slot);
        }
        self.ensure_scaler(windows, decoder)?;
        self.platform.set_scaler_crop(decoder, Some(crop))?;
        match slot {
            Some(slot) => self.platform.bind_slot(BindSource::Scaler(decoder), slot),
            None => Ok(()),
        }
    }

    fn zoom_out(&self, windows: &mut WindowTable, window: usize, decoder: usize) {
        let slot = windows.slot_of(window);
        if let Some(slot) = slot {
            self.unbind_slot(slot);
        }
        self.remove_scaler(windows, decoder);
        if let Some(slot) = slot {
            if let Err(e) = self.platform.bind_slot(BindSource::Decoder(decoder), slot) {
                log::error!("window {}: {}", window, e);
            }
        }
    }

    /// Creates the scaler group of `decoder` and feeds it from the decoder.
    pub(crate) fn ensure_scaler(&self, windows: &mut WindowTable, decoder: usize) -> HwResult<()> {
        if windows.has_scaler(decoder) {
            return Ok(());
        }
        let mode = self.current_mode();
        self.platform
            .create_scaler(decoder, mode.width, mode.height)?;
        if let Err(e) = self.platform.bind_scaler(decoder, decoder) {
            if let Err(e) = self.platform.destroy_scaler(decoder) {
                log::warn!("scaler {}: {}", decoder, e);
            }
            return Err(e);
        }
        windows.mark_scaler(decoder, true);
        Ok(())
    }

    pub(crate) fn remove_scaler(&self, windows: &mut WindowTable, decoder: usize) {
        if !windows.has_scaler(decoder) {
            return;
        }
        if let Err(e) = self.platform.unbind_scaler(decoder, decoder) {
            log::warn!("scaler {}: {}", decoder, e);
        }
        if let Err(e) = self.platform.destroy_scaler(decoder) {
            log::warn!("scaler {}: {}", decoder, e);
        }
        windows.mark_scaler(decoder, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: Rect = Rect {
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
    };

    #[test]
    fn centre_quarter_of_1080p() {
        let crop = crop_rect(Rect::new(480, 270, 960, 540), SCREEN, 1920, 1080).unwrap();
        assert_eq!(crop, Rect::new(480, 268, 960, 536));
    }

    #[test]
    fn selection_scales_into_larger_picture() {
        let crop = crop_rect(Rect::new(0, 0, 960, 540), SCREEN, 3840, 2160).unwrap();
        assert_eq!(crop, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn tiny_selection_is_widened_to_minimum() {
        let crop = crop_rect(Rect::new(1900, 1070, 10, 10), SCREEN, 1920, 1080).unwrap();
        assert_eq!(crop.width, MIN_CROP);
        assert_eq!(crop.height, MIN_CROP);
        assert!(crop.x + crop.width <= 1920);
        assert!(crop.y + crop.height <= 1080);
        assert_eq!(crop.x % 4, 0);
        assert_eq!(crop.y % 4, 0);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(crop_rect(Rect::new(0, 0, 0, 10), SCREEN, 1920, 1080).is_err());
        assert!(crop_rect(Rect::new(0, 0, 10, 10), SCREEN, 0, 1080).is_err());
    }
}
