use log::{debug, info};
use std::collections::HashMap;

use crate::av::{Command, CommandQueue, Frame, MediaFormat, MediaKind, TrackId};
use crate::error::{FlowError, Result};
use crate::pipeline::{OutputStage, Role, Source, Stage};

use super::MediaSource;

/// Several [`MediaSource`]s played back to back as one logical stream.
///
/// Downstream track ids are those of the first file. Each file maps its
/// first track of a kind onto the first file's track of that kind, so files
/// that enumerate their tracks in a different order still feed the same
/// consumers. Timestamps of a file are offset past the last timestamp of
/// the previous one.
///
/// When a file ends and more follow, `OutputFormatChanged` is published for
/// every selected track instead of `EndOfFile`. Each connected plugin then
/// reconfigures itself and calls [`Source::next_file`]; once all of them
/// did, the next file's data is published.
pub struct MultipleMediaSource {
    files: Vec<MediaSource>,
    current: usize,
    track_maps: Vec<HashMap<TrackId, TrackId>>,
    sample_time_offsets: HashMap<TrackId, i64>,
    current_sample_times: HashMap<TrackId, i64>,
    output_queue: CommandQueue,
    is_last_file: bool,
    connected_plugins: usize,
    next_file_requests: usize,
    started: bool,
}

impl MultipleMediaSource {
    /// Source with no files.
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            current: 0,
            track_maps: Vec::new(),
            sample_time_offsets: HashMap::new(),
            current_sample_times: HashMap::new(),
            output_queue: CommandQueue::new(),
            is_last_file: true,
            connected_plugins: 0,
            next_file_requests: 0,
            started: false,
        }
    }

    /// Files in playback order.
    pub fn files(&self) -> &[MediaSource] {
        &self.files
    }

    /// Number of files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Appends a file. Must have every media kind the first file has.
    pub fn add(&mut self, file: MediaSource) -> Result<()> {
        let index = self.files.len();
        self.insert_at(index, file)
    }

    /// Inserts a file at `index`. Must have every media kind the first file has.
    pub fn insert_at(&mut self, index: usize, file: MediaSource) -> Result<()> {
        self.check_not_started()?;
        if index > self.files.len() {
            return Err(FlowError::InvalidSource(format!(
                "cannot insert at {} into {} files",
                index,
                self.files.len()
            )));
        }
        self.validate(&file, index)?;
        self.files.insert(index, file);
        self.track_maps.insert(index, HashMap::new());
        self.is_last_file = self.files.len() == 1;
        Ok(())
    }

    /// Removes the file at `index`.
    pub fn remove(&mut self, index: usize) -> Result<MediaSource> {
        self.check_not_started()?;
        if index >= self.files.len() {
            return Err(FlowError::InvalidSource(format!(
                "no file at {}, {} files added",
                index,
                self.files.len()
            )));
        }
        self.track_maps.remove(index);
        let file = self.files.remove(index);
        self.is_last_file = self.files.len() <= 1;
        Ok(file)
    }

    /// The file being read.
    pub fn current_file(&self) -> Option<&MediaSource> {
        self.files.get(self.current)
    }

    fn check_not_started(&self) -> Result<()> {
        if self.started {
            return Err(FlowError::InvalidState(
                "files cannot change once the source started".into(),
            ));
        }
        Ok(())
    }

    /// Every file must carry the media kinds of the first one.
    fn validate(&self, file: &MediaSource, index: usize) -> Result<()> {
        let first = match self.files.first() {
            Some(first) if index > 0 => first,
            _ => file,
        };
        for kind in [MediaKind::Video, MediaKind::Audio] {
            if first.track_id_by_kind(kind).is_none() {
                continue;
            }
            let missing = self
                .files
                .iter()
                .chain(std::iter::once(file))
                .find(|candidate| candidate.track_id_by_kind(kind).is_none());
            if let Some(missing) = missing {
                return Err(FlowError::InvalidSource(format!(
                    "{} has no {:?} track but the first file has one",
                    missing.source_id(),
                    kind
                )));
            }
        }
        Ok(())
    }

    fn map_track(&self, track: TrackId) -> TrackId {
        self.track_maps
            .get(self.current)
            .and_then(|map| map.get(&track))
            .copied()
            .unwrap_or(track)
    }

    /// Mirrors the head of the current file's queue onto this source's queue.
    fn has_data(&mut self) {
        let head = match self.files.get_mut(self.current) {
            Some(file) => file.output_queue().first(),
            None => return,
        };
        match head {
            None => {}
            Some((Command::EndOfFile, _)) if !self.is_last_file => {
                self.queue_for_selected(Command::OutputFormatChanged)
            }
            Some((Command::EndOfFile, _)) => self.queue_for_selected(Command::EndOfFile),
            Some((command, track)) => {
                let track = self.map_track(track);
                self.output_queue.queue(command, track);
            }
        }
    }

    fn queue_for_selected(&mut self, command: Command) {
        let tracks: Vec<TrackId> = match self.files.get(self.current) {
            Some(file) => file.selected_tracks().to_vec(),
            None => return,
        };
        for track in tracks {
            let track = self.map_track(track);
            self.output_queue.queue(command, track);
        }
    }

    /// True when the current file has nothing left but its end of file.
    fn is_last_frame(&mut self) -> bool {
        match self.files.get_mut(self.current) {
            Some(file) => {
                let queue = file.output_queue();
                !queue.is_empty() && queue.iter().all(|(command, _)| *command == Command::EndOfFile)
            }
            None => false,
        }
    }

    fn switch_to_next_file(&mut self) -> Result<()> {
        let offset = self
            .current_sample_times
            .values()
            .copied()
            .max()
            .unwrap_or(0)
            + 1;
        for track in self.current_sample_times.keys() {
            self.sample_time_offsets.insert(*track, offset);
        }
        if let Some(finished) = self.files.get_mut(self.current) {
            finished.close()?;
        }
        self.current += 1;
        info!(
            "switching to file {} of {}, timestamps offset by {}",
            self.current + 1,
            self.files.len(),
            offset
        );
        match self.files.get_mut(self.current) {
            Some(file) => file.start(),
            None => Err(FlowError::InvalidState("no file left to switch to".into())),
        }
    }
}

impl Default for MultipleMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MultipleMediaSource {
    fn role(&self) -> Role {
        Role::Source
    }

    fn start(&mut self) -> Result<()> {
        let file = self
            .files
            .get_mut(self.current)
            .ok_or_else(|| FlowError::InvalidSource("no file added".into()))?;
        file.start()?;
        self.started = true;
        self.has_data();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.output_queue.clear();
        self.queue_for_selected(Command::EndOfFile);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut result = Ok(());
        for file in self.files.iter_mut() {
            if let Err(err) = file.close() {
                result = Err(err);
            }
        }
        result
    }
}

impl OutputStage for MultipleMediaSource {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl Source for MultipleMediaSource {
    fn pull(&mut self, frame: &mut Frame) -> Result<()> {
        if self.current + 1 == self.files.len() {
            self.is_last_file = true;
        }

        let file = self
            .files
            .get_mut(self.current)
            .ok_or_else(|| FlowError::InvalidState("pull without a file".into()))?;
        let pulled = match file.output_queue().dequeue()? {
            (Command::HasData, _) => {
                file.pull(frame)?;
                true
            }
            _ => false,
        };

        if pulled {
            let track = self.map_track(frame.track_id());
            frame.set_track_id(track);
            let offset = self.sample_time_offsets.get(&track).copied().unwrap_or(0);
            frame.set_pts(frame.pts() + offset);
        }

        self.has_data();
        if pulled {
            self.current_sample_times.insert(frame.track_id(), frame.pts());
        }

        if self.is_last_frame() && !self.is_last_file {
            self.switch_to_next_file()?;
        }
        Ok(())
    }

    fn track_count(&self) -> usize {
        self.current_file().map_or(0, |file| file.track_count())
    }

    fn track_format(&self, track: TrackId) -> Result<MediaFormat> {
        self.current_file()
            .ok_or_else(|| FlowError::InvalidSource("no file added".into()))?
            .track_format(track)
    }

    fn track_id_by_kind(&self, kind: MediaKind) -> Option<TrackId> {
        self.current_file()?.track_id_by_kind(kind)
    }

    /// Selects the first track of `track`'s kind in every file.
    fn select_track(&mut self, track: TrackId) -> Result<()> {
        let kind = self.track_format(track)?.kind;
        let downstream = self
            .files
            .first()
            .and_then(|file| file.track_id_by_kind(kind))
            .ok_or(FlowError::MissingFormat(kind))?;
        for (index, file) in self.files.iter_mut().enumerate() {
            let file_track = file.track_id_by_kind(kind).ok_or_else(|| {
                FlowError::InvalidSource(format!("{} has no {:?} track", file.source_id(), kind))
            })?;
            file.select_track(file_track)?;
            self.track_maps[index].insert(file_track, downstream);
        }
        debug!("selected {:?} tracks, downstream track {}", kind, downstream);
        Ok(())
    }

    fn duration(&self) -> i64 {
        self.files.iter().map(|file| file.segments_duration()).sum()
    }

    fn is_last_file(&self) -> bool {
        self.is_last_file
    }

    fn set_track_map(&mut self, file_track: TrackId, downstream: TrackId) {
        if let Some(map) = self.track_maps.get_mut(self.current) {
            map.insert(file_track, downstream);
        }
    }

    fn next_file(&mut self) -> Result<()> {
        self.next_file_requests += 1;
        if self.next_file_requests >= self.connected_plugins {
            self.has_data();
            self.next_file_requests = 0;
        }
        Ok(())
    }

    fn increment_connected_plugins(&mut self) {
        self.connected_plugins += 1;
    }
}
