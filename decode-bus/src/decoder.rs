//! Frame feed and decode pipeline lifecycle.

use crate::{
    bus::DisplayBus,
    capacity::Usage,
    channel::ChannelStatus,
    error::{BusError, BusResult},
    hw::{DecoderAttr, HwError, HwResult, PictureBuffer},
    packet::{MediaType, StreamFrame, VideoCodec, VideoParams},
    window::WindowTable,
};

/// Picture buffer sizing for one engine channel.
///
/// Lossless compression is off for MJPEG and for pictures smaller than
/// `compress_min_pixels`.
pub fn picture_buffer(
    codec: VideoCodec,
    width: u32,
    height: u32,
    compress_min_pixels: u64,
) -> PictureBuffer {
    let pixels = width as u64 * height as u64;
    let compress = codec != VideoCodec::Mjpeg && pixels >= compress_min_pixels;
    let stride = align_up(width as u64, 64);
    let rows = align_up(height as u64, 16);
    let mut frame_size = stride.saturating_mul(rows).saturating_mul(3) / 2;
    if compress {
        // header plane: 16 bytes per 16x16 block
        frame_size = frame_size.saturating_add((stride / 16).saturating_mul(rows / 16) * 16);
    }
    PictureBuffer {
        compress,
        frame_size: u32::try_from(frame_size).unwrap_or(u32::MAX),
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

enum Reconfigure {
    None,
    Rebuild { resized: bool },
}

impl DisplayBus {
    /// Feeds one compressed frame to `channel`.
    ///
    /// Video frames reconfigure the pipeline when their parameters change and
    /// are dropped until the first key frame after that. Audio frames play
    /// only while `channel` owns audio out.
    pub fn send_frame(&self, channel: usize, frame: &StreamFrame) -> BusResult<()> {
        if frame.size() == 0 {
            return Err(BusError::InvalidArgument("empty frame".into()));
        }
        match frame.media {
            MediaType::Video => self.send_video(channel, frame),
            MediaType::Audio => {
                self.channels.check(channel)?;
                let params = frame.audio_params()?;
                self.audio.play(channel, params, &frame.data)
            }
            MediaType::Unknown(t) => Err(BusError::InvalidArgument(format!(
                "unknown media type {}",
                t
            ))),
        }
    }

    fn send_video(&self, channel: usize, frame: &StreamFrame) -> BusResult<()> {
        let params = frame.video_params()?;

        let action = {
            let mut state = self.channels.lock(channel)?;
            if state.status != ChannelStatus::Active {
                return Err(BusError::ChannelNotActive(channel));
            }
            let current = state.params;
            match current {
                Some(c) if c == params => Reconfigure::None,
                _ => {
                    let old = state.usage();
                    let new = Usage::new(params.width, params.height, params.fps);
                    if !self.capacity.admit(old, new) {
                        self.capacity.release(old);
                        state.reset_stream();
                        drop(state);
                        self.teardown_pipeline(&mut self.lock_windows(), channel);
                        log::warn!(
                            "channel {}: {}x{}@{} denied, {} of {} in use",
                            channel,
                            params.width,
                            params.height,
                            params.fps,
                            self.capacity.used(),
                            self.capacity.ceiling()
                        );
                        return Err(BusError::NoCapacity {
                            requested: new.cost(),
                            in_use: self.capacity.used(),
                            ceiling: self.capacity.ceiling(),
                        });
                    }
                    state.params = Some(params);
                    match current {
                        Some(c) if !c.needs_rebuild(&params) => {
                            log::info!(
                                "channel {}: frame rate {} -> {}",
                                channel,
                                c.fps,
                                params.fps
                            );
                            Reconfigure::None
                        }
                        _ => {
                            state.key_received = false;
                            Reconfigure::Rebuild {
                                resized: current.is_some_and(|c| {
                                    c.width != params.width || c.height != params.height
                                }),
                            }
                        }
                    }
                }
            }
        };

        if let Reconfigure::Rebuild { resized } = action {
            self.rebuild_pipeline(channel, params, resized)?;
        }

        {
            let mut state = self.channels.lock(channel)?;
            if state.status != ChannelStatus::Active {
                return Err(BusError::ChannelNotActive(channel));
            }
            if !state.key_received {
                if !frame.is_key {
                    log::trace!("channel {}: waiting for key frame", channel);
                    return Ok(());
                }
                state.key_received = true;
            }
        }

        let decoder = self.decoder_of(channel);
        self.platform
            .send_stream(decoder, &frame.data, frame.pts, self.config.send_timeout())
            .map_err(|e| {
                log::warn!("channel {}: {}", channel, e);
                BusError::DecodeEngine(e)
            })
    }

    fn rebuild_pipeline(&self, channel: usize, params: VideoParams, resized: bool) -> BusResult<()> {
        let mut windows = self.lock_windows();

        // released while the channel lock was dropped
        if self.channels.lock(channel)?.params != Some(params) {
            return Err(BusError::ChannelNotActive(channel));
        }

        if resized {
            if let Some(window) = windows.owner_of(channel) {
                if windows.entry_mut(window)?.crop.take().is_some() {
                    log::info!("window {}: picture resized, zoom cleared", window);
                }
            }
        }

        if let Err(e) = self.build_pipeline(&mut windows, channel, params) {
            log::error!("channel {}: {}", channel, e);
            self.capacity
                .release(Usage::new(params.width, params.height, params.fps));
            self.channels.lock(channel)?.reset_stream();
            return Err(BusError::PipelineCreationFailed(e));
        }
        log::info!(
            "channel {}: decoder {} running {:?} {}x{}@{}",
            channel,
            self.decoder_of(channel),
            params.codec,
            params.width,
            params.height,
            params.fps
        );
        Ok(())
    }

    /// Creates the engine channel for `channel` and binds it to the slot
    /// showing its window. Everything created is torn down on failure.
    fn build_pipeline(
        &self,
        windows: &mut WindowTable,
        channel: usize,
        params: VideoParams,
    ) -> HwResult<()> {
        let decoder = self.decoder_of(channel);
        match windows.decoder_owner(decoder) {
            Some(owner) if owner != channel => {
                log::error!(
                    "decoder {} is held by channel {}, cannot serve channel {}",
                    decoder,
                    owner,
                    channel
                );
                return Err(HwError::new("create_decoder", HwError::NOT_READY));
            }
            Some(_) => self.teardown_pipeline(windows, channel),
            None => {}
        }

        let attr = DecoderAttr {
            codec: params.codec,
            width: params.width,
            height: params.height,
            ref_frames: params.ref_frames,
            frame_buf_count: self.config.frame_buf_count,
            stream_buf_size: self.config.stream_buf_size,
            picture: picture_buffer(
                params.codec,
                params.width,
                params.height,
                self.config.compress_min_pixels,
            ),
        };
        self.platform.create_decoder(decoder, &attr)?;
        windows.mark_decoder(decoder, Some(channel));

        let result = self.platform.start_receive(decoder).and_then(|_| {
            let Some(window) = windows.owner_of(channel) else {
                return Ok(());
            };
            let Some(slot) = windows.slot_of(window) else {
                return Ok(());
            };
            self.bind_window(windows, window, slot)
        });
        if let Err(e) = result {
            self.teardown_pipeline(windows, channel);
            return Err(e);
        }
        Ok(())
    }

    /// Unbinds and destroys the engine channel created for `channel`, if it
    /// still holds its decoder.
    pub(crate) fn teardown_pipeline(&self, windows: &mut WindowTable, channel: usize) {
        let decoder = self.decoder_of(channel);
        if windows.decoder_owner(decoder) != Some(channel) {
            return;
        }
        for slot in 0..windows.len() {
            if let Some(source) = self.platform.slot_binding(slot) {
                if source.decoder() == decoder {
                    if let Err(e) = self.platform.unbind_slot(source, slot) {
                        log::warn!("slot {}: {}", slot, e);
                    }
                }
            }
        }
        self.remove_scaler(windows, decoder);
        if let Err(e) = self.platform.stop_receive(decoder) {
            log::warn!("decoder {}: {}", decoder, e);
        }
        if let Err(e) = self.platform.destroy_decoder(decoder) {
            log::warn!("decoder {}: {}", decoder, e);
        }
        windows.mark_decoder(decoder, None);
        log::debug!("channel {}: decoder {} torn down", channel, decoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_follows_codec_and_size() {
        let threshold = 1280 * 720;
        assert!(picture_buffer(VideoCodec::H264, 1920, 1080, threshold).compress);
        assert!(picture_buffer(VideoCodec::H265, 1280, 720, threshold).compress);
        assert!(!picture_buffer(VideoCodec::H264, 704, 576, threshold).compress);
        assert!(!picture_buffer(VideoCodec::Mjpeg, 3840, 2160, threshold).compress);
    }

    #[test]
    fn frame_size_covers_aligned_picture() {
        let plain = picture_buffer(VideoCodec::H264, 704, 576, u64::MAX);
        assert_eq!(plain.frame_size, 704 * 576 * 3 / 2);
        let compressed = picture_buffer(VideoCodec::H264, 1920, 1080, 0);
        assert!(compressed.frame_size > 1920 * 1088 * 3 / 2);
    }

    #[test]
    fn frame_size_saturates_for_huge_pictures() {
        let buffer = picture_buffer(VideoCodec::H264, u32::MAX, u32::MAX, 0);
        assert!(buffer.compress);
        assert_eq!(buffer.frame_size, u32::MAX);
    }
}
