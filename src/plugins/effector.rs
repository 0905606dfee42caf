use log::{debug, trace};

use crate::av::{BufferIndex, Command, CommandQueue, Frame, MediaFormat, MediaKind, Resolution, TrackId};
use crate::error::{FlowError, Result};
use crate::pipeline::{InputStage, OutputStage, Plugin, Role, Stage};
use crate::render::{surface_channel, RenderHandle, Surface, SurfaceProvider, SurfaceRequest, SurfaceTarget};

use super::{PluginState, EDGE_TRACK};

/// Frames the effector swaps onto the encoder surface before one is pulled.
const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// A per-frame video transformation.
pub trait VideoEffect: Send {
    /// Microsecond range the effect covers. `None` covers the whole stream.
    fn segment(&self) -> Option<(i64, i64)> {
        None
    }

    /// Prepares backend resources once the effector starts.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Picture size of the incoming frames.
    fn set_input_resolution(&mut self, _resolution: Resolution) {}

    /// Renders the image latched on `input` in place of a plain copy.
    fn apply(&mut self, input: &mut dyn Surface, pts: i64) -> Result<()>;
}

fn covers(segment: Option<(i64, i64)>, pts: i64) -> bool {
    match segment {
        None => true,
        Some((start, end)) => start <= pts && pts <= end,
    }
}

#[derive(Debug, Clone, Copy)]
struct TimeScale {
    factor: u32,
    start: i64,
    end: i64,
    frames: u64,
}

/// Draws decoded video through a chain of effects onto the encoder surface.
///
/// The effector reads from a surface it creates through the render backend
/// and writes into the encoder's input surface. In time-scaler mode it also
/// drops frames inside a segment and compresses their timestamps.
pub struct VideoEffector {
    role: Role,
    backend: RenderHandle,
    state: PluginState,
    effects: Vec<Box<dyn VideoEffect>>,
    input_surface: Option<Box<dyn Surface>>,
    output_surface: Option<Box<dyn Surface>>,
    waiting: Vec<SurfaceProvider>,
    input_queue: CommandQueue,
    output_queue: CommandQueue,
    media_format: Option<MediaFormat>,
    resolution: Option<Resolution>,
    track_id: TrackId,
    output_track_id: TrackId,
    frames_in_flight: usize,
    last_pts: i64,
    time_scale: Option<TimeScale>,
}

impl VideoEffector {
    /// Effector drawing through `backend`.
    pub fn new(backend: RenderHandle) -> Self {
        Self {
            role: Role::Effector,
            backend,
            state: PluginState::Starting,
            effects: Vec::new(),
            input_surface: None,
            output_surface: None,
            waiting: Vec::new(),
            input_queue: CommandQueue::new(),
            output_queue: CommandQueue::new(),
            media_format: None,
            resolution: None,
            track_id: 0,
            output_track_id: EDGE_TRACK,
            frames_in_flight: 0,
            last_pts: 0,
            time_scale: None,
        }
    }

    /// An effector that keeps one of every `factor` frames in `[start, end)`
    /// and plays that range `factor` times faster.
    pub fn time_scaler(backend: RenderHandle, factor: u32, segment: (i64, i64)) -> Self {
        let mut effector = Self::new(backend);
        effector.role = Role::TimeScaler;
        effector.time_scale = Some(TimeScale {
            factor: factor.max(1),
            start: segment.0,
            end: segment.1,
            frames: 0,
        });
        effector
    }

    /// Appends an effect.
    pub fn add_effect(&mut self, effect: Box<dyn VideoEffect>) {
        self.effects.push(effect);
    }

    /// Removes the effect at `index`.
    pub fn remove_effect(&mut self, index: usize) -> Option<Box<dyn VideoEffect>> {
        if index < self.effects.len() {
            Some(self.effects.remove(index))
        } else {
            None
        }
    }

    /// Number of effects.
    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        self.state
    }

    fn is_draining(&self) -> bool {
        matches!(self.state, PluginState::Draining | PluginState::Drained)
    }

    fn feed_me_if_not_draining(&mut self) {
        if self.frames_in_flight < MAX_FRAMES_IN_FLIGHT && !self.is_draining() {
            self.input_queue.queue(Command::NeedData, self.track_id);
        }
    }

    fn ensure_input_surface(&mut self) -> Result<SurfaceTarget> {
        if let Some(surface) = self.input_surface.as_ref() {
            return Ok(surface.target());
        }
        let resolution = self.resolution.unwrap_or_default();
        let surface = self.backend.create_surface(resolution)?;
        let target = surface.target();
        debug!("effector created input surface {:?}", target);
        self.input_surface = Some(surface);
        let context = self.backend.context();
        for mut provider in self.waiting.drain(..) {
            provider.provide(context);
        }
        Ok(target)
    }

    /// New timestamp for `pts`, `None` when the frame is dropped.
    fn rescale(&mut self, pts: i64) -> Option<i64> {
        let scale = match self.time_scale.as_mut() {
            Some(scale) => scale,
            None => return Some(pts),
        };
        if pts < scale.start {
            return Some(pts);
        }
        let factor = i64::from(scale.factor);
        if pts < scale.end {
            scale.frames += 1;
            if scale.frames % u64::from(scale.factor) != 0 {
                return None;
            }
            return Some(scale.start + (pts - scale.start) / factor);
        }
        Some(scale.start + (scale.end - scale.start) / factor + (pts - scale.end))
    }

    fn render(&mut self, pts: i64) -> Result<()> {
        let input = self
            .input_surface
            .as_mut()
            .ok_or_else(|| FlowError::Render("effector input surface not created".into()))?;
        let effect = self
            .effects
            .iter_mut()
            .find(|effect| covers(effect.segment(), pts));
        match effect {
            Some(effect) => effect.apply(input.as_mut(), pts),
            None => input.draw_image(),
        }
    }

    fn has_data(&mut self, pts: i64) -> Result<()> {
        if self.frames_in_flight < MAX_FRAMES_IN_FLIGHT {
            let output = self
                .output_surface
                .as_mut()
                .ok_or_else(|| FlowError::Render("encoder surface not set".into()))?;
            output.set_presentation_time(pts);
            output.swap_buffers()?;
            self.frames_in_flight += 1;
        }
        self.last_pts = pts;
        self.output_queue.queue(Command::HasData, EDGE_TRACK);
        Ok(())
    }
}

impl Stage for VideoEffector {
    fn role(&self) -> Role {
        self.role
    }

    fn start(&mut self) -> Result<()> {
        let output = self
            .output_surface
            .as_mut()
            .ok_or_else(|| FlowError::Render("encoder surface not set".into()))?;
        output.make_current()?;
        self.ensure_input_surface()?;
        for effect in self.effects.iter_mut() {
            effect.start()?;
        }
        self.state = PluginState::Normal;
        self.input_queue.clear();
        self.input_queue.queue(Command::NeedInputFormat, self.track_id);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state = PluginState::Paused;
        self.input_queue.clear();
        self.output_queue.clear();
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut surface) = self.input_surface.take() {
            surface.release();
        }
        if let Some(mut surface) = self.output_surface.take() {
            surface.release();
        }
        Ok(())
    }
}

impl OutputStage for VideoEffector {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl InputStage for VideoEffector {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.input_queue
    }

    fn track_id(&self) -> TrackId {
        self.track_id
    }

    fn set_track_id(&mut self, track_id: TrackId) {
        self.track_id = track_id;
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn configure(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.media_format = Some(format);
        Ok(())
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        if frame.is_eof() {
            return self.drain(None);
        }
        if frame.is_empty() {
            self.feed_me_if_not_draining();
            return Ok(());
        }

        let pts = match self.rescale(frame.pts()) {
            Some(pts) => pts,
            None => {
                trace!("time scaler dropping frame at {}", frame.pts());
                if let Some(input) = self.input_surface.as_mut() {
                    input.await_new_image()?;
                }
                self.feed_me_if_not_draining();
                return Ok(());
            }
        };

        if let Some(input) = self.input_surface.as_mut() {
            input.await_new_image()?;
        }
        self.render(frame.pts())?;
        self.has_data(pts)
    }

    fn drain(&mut self, _index: Option<BufferIndex>) -> Result<()> {
        if self.is_draining() {
            return Ok(());
        }
        self.state = PluginState::Draining;
        self.input_queue.clear();
        self.output_queue.queue(Command::EndOfFile, EDGE_TRACK);
        Ok(())
    }
}

impl Plugin for VideoEffector {
    /// Placeholder frame: the image itself already sits on the encoder surface.
    fn get_frame(&mut self) -> Result<Frame> {
        if self.state == PluginState::Drained {
            return Err(FlowError::InvalidState("effector pulled after drain".into()));
        }
        Ok(Frame::with_data([0u8])
            .with_pts(self.last_pts)
            .with_track_id(self.output_track_id)
            .with_buffer_index(BufferIndex::new(0)))
    }

    fn release_output_buffer(&mut self, _index: BufferIndex) -> Result<()> {
        self.frames_in_flight = self.frames_in_flight.saturating_sub(1);
        self.feed_me_if_not_draining();
        Ok(())
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.media_format
            .clone()
            .ok_or(FlowError::MissingFormat(MediaKind::Video))
    }

    fn output_track_id(&self) -> TrackId {
        self.output_track_id
    }

    fn set_output_track_id(&mut self, track_id: TrackId) {
        self.output_track_id = track_id;
    }

    fn set_input_resolution(&mut self, resolution: Resolution) {
        self.resolution = Some(resolution);
        if let Some(surface) = self.input_surface.as_mut() {
            surface.set_input_size(resolution);
        }
        for effect in self.effects.iter_mut() {
            effect.set_input_resolution(resolution);
        }
    }

    fn input_target(&mut self) -> Result<SurfaceTarget> {
        self.ensure_input_surface()
    }

    fn set_output_surface(&mut self, surface: Box<dyn Surface>) -> Result<()> {
        if let Some(mut previous) = self.output_surface.replace(surface) {
            previous.release();
        }
        Ok(())
    }

    fn output_surface(&mut self) -> Option<&mut dyn Surface> {
        match self.output_surface.as_mut() {
            Some(surface) => Some(surface.as_mut()),
            None => None,
        }
    }

    fn request_surface(&mut self) -> Option<SurfaceRequest> {
        let (mut provider, request) = surface_channel();
        if self.input_surface.is_some() {
            provider.provide(self.backend.context());
        } else {
            self.waiting.push(provider);
        }
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::{TestRenderBackend, TestSurface};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Marker {
        segment: Option<(i64, i64)>,
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl VideoEffect for Marker {
        fn segment(&self) -> Option<(i64, i64)> {
            self.segment
        }

        fn apply(&mut self, _input: &mut dyn Surface, pts: i64) -> Result<()> {
            self.seen.lock().push(pts);
            Ok(())
        }
    }

    fn started(mut effector: VideoEffector) -> (VideoEffector, Arc<Mutex<crate::render::tests::SurfaceLog>>) {
        let encoder_surface = TestSurface::new(Resolution::new(320, 240));
        let log = encoder_surface.log();
        effector.set_output_surface(Box::new(encoder_surface)).unwrap();
        effector.start().unwrap();
        (effector, log)
    }

    fn video_frame(pts: i64) -> Frame {
        Frame::with_data([1u8]).with_pts(pts)
    }

    #[test]
    fn test_start_requires_encoder_surface() {
        let mut effector = VideoEffector::new(Arc::new(TestRenderBackend::new()));
        assert!(matches!(effector.start(), Err(FlowError::Render(_))));
    }

    #[test]
    fn test_effect_applies_inside_its_segment_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut effector = VideoEffector::new(Arc::new(TestRenderBackend::new()));
        effector.add_effect(Box::new(Marker {
            segment: Some((100, 200)),
            seen: seen.clone(),
        }));
        let (mut effector, log) = started(effector);
        assert_eq!(
            effector.input_queue().first(),
            Some((Command::NeedInputFormat, 0))
        );

        effector.push(video_frame(50)).unwrap();
        effector.release_output_buffer(BufferIndex::new(0)).unwrap();
        effector.push(video_frame(150)).unwrap();

        assert_eq!(*seen.lock(), vec![150]);
        assert_eq!(log.lock().swapped, vec![50, 150]);
    }

    #[test]
    fn test_at_most_two_frames_in_flight() {
        let (mut effector, log) = started(VideoEffector::new(Arc::new(TestRenderBackend::new())));
        effector.input_queue().clear();
        for pts in [0, 10, 20] {
            effector.push(video_frame(pts)).unwrap();
        }
        assert_eq!(log.lock().swapped.len(), 2);
        assert_eq!(effector.output_queue().len(), 3);
        assert!(effector.input_queue().is_empty());

        let mut frame = effector.get_frame().unwrap();
        assert_eq!(frame.len(), 1);
        effector
            .release_output_buffer(frame.take_buffer_index().unwrap())
            .unwrap();
        assert_eq!(effector.input_queue().first(), Some((Command::NeedData, 0)));
    }

    #[test]
    fn test_time_scaler_drops_and_compresses() {
        let scaler = VideoEffector::time_scaler(Arc::new(TestRenderBackend::new()), 2, (100, 300));
        let (mut scaler, log) = started(scaler);
        assert_eq!(scaler.role(), Role::TimeScaler);

        for pts in [50, 100, 200, 400] {
            scaler.push(video_frame(pts)).unwrap();
            scaler.release_output_buffer(BufferIndex::new(0)).unwrap();
        }
        // 100 is the first in-segment frame and is dropped; 400 is shifted back by 100
        assert_eq!(log.lock().swapped, vec![50, 150, 300]);
    }

    #[test]
    fn test_surface_request_resolves_once_input_surface_exists() {
        let backend = Arc::new(TestRenderBackend::new());
        let mut effector = VideoEffector::new(backend.clone());
        let request = effector.request_surface().unwrap();
        let target = effector.input_target().unwrap();

        let context = futures::executor::block_on(request).unwrap();
        assert_eq!(context.id(), 7);
        assert_eq!(backend.surfaces.lock().len(), 1);
        assert_eq!(effector.input_target().unwrap(), target);
    }

    #[test]
    fn test_drain_queues_end_of_file() {
        let (mut effector, _) = started(VideoEffector::new(Arc::new(TestRenderBackend::new())));
        effector.push(Frame::eof()).unwrap();
        assert!(effector.input_queue().is_empty());
        assert_eq!(effector.output_queue().first(), Some((Command::EndOfFile, 0)));
    }
}
