use super::progress::Progress;
use crate::config::{ExecutionMode, ResizeMode};
use crate::device::Device;
use crate::error::Error;
use crate::frame::{output_frame_name, save_png, FrameRef, FrameSequence};
use crate::model::ResolvedChain;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};

/// Shared flag checked between frames.
pub type CancelFlag = Arc<AtomicBool>;

/// Runs the upscaler chain over a normalized frame sequence.
pub struct Upscale<'a> {
    chain: &'a ResolvedChain,
    resize: ResizeMode,
    crop: bool,
    cancel: Option<CancelFlag>,
    show_progress: bool,
}

impl<'a> Upscale<'a> {
    pub fn new(chain: &'a ResolvedChain, resize: ResizeMode, crop: bool) -> Self {
        Self {
            chain,
            resize,
            crop,
            cancel: None,
            show_progress: false,
        }
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn show_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn process_frame(&self, position: usize, frame: &FrameRef, output_dir: &Path) -> Result<(), Error> {
        let run = || -> Result<(), Error> {
            let image = frame.load_rgb()?;
            let upscaled = self.chain.apply(&image, self.resize, self.crop)?;
            save_png(&upscaled, &output_dir.join(output_frame_name(position)))
        };
        run().map_err(|e| Error::frame_failed(position, &frame.path, e))
    }

    /// Number of workers for pool mode: bounded by `max_workers` and by how
    /// many frames fit in the device memory the device reports.
    pub fn pool_size(max_workers: usize, frame_memory_bytes: u64, device: &dyn Device) -> usize {
        let fitting = match device.available_memory() {
            Some(available) => (available / frame_memory_bytes.max(1)) as usize,
            None => 1,
        };
        fitting.clamp(1, max_workers.max(1))
    }

    /// Upscales every frame into `output_dir` as `{position:07}.png` and
    /// returns the number of frames written.
    pub fn execute(
        &self,
        sequence: &FrameSequence,
        output_dir: &Path,
        mode: ExecutionMode,
        device: &dyn Device,
    ) -> Result<usize, Error> {
        fs::create_dir_all(output_dir)?;
        let header = format!(
            "Upscaling {} frames [stages: {}] [size: {}]",
            sequence.len(),
            self.chain.stage_count(),
            self.resize
        );
        let progress = Progress::new(sequence.len(), &header, self.show_progress);

        let result = match mode {
            ExecutionMode::Sequential => self.execute_sequential(sequence, output_dir, &progress),
            ExecutionMode::Pool {
                max_workers,
                frame_memory_bytes,
            } => {
                let workers = Self::pool_size(max_workers, frame_memory_bytes, device);
                if workers == 1 {
                    self.execute_sequential(sequence, output_dir, &progress)
                } else {
                    self.execute_pool(sequence, output_dir, workers, &progress)
                }
            }
        };

        match &result {
            Ok(written) => {
                progress.finish();
                info!("Upscaled {} frames into {}", written, output_dir.display());
            }
            Err(e) => {
                progress.abandon();
                warn!("Upscaling stopped: {}", e);
            }
        }
        result
    }

    fn execute_sequential(&self, sequence: &FrameSequence, output_dir: &Path, progress: &Progress) -> Result<usize, Error> {
        for (position, frame) in sequence.iter().enumerate() {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.process_frame(position, frame, output_dir)?;
            progress.frame_done(position, position + 1);
        }
        Ok(sequence.len())
    }

    fn process_incoming_frames(
        &self,
        receiver: Receiver<(usize, &FrameRef)>,
        sender: Sender<Result<usize, Error>>,
        output_dir: &Path,
        shutdown_flag: &AtomicBool,
    ) {
        for (position, frame) in receiver {
            if shutdown_flag.load(Ordering::SeqCst) {
                break;
            }
            let result = self.process_frame(position, frame, output_dir).map(|_| position);
            if result.is_err() {
                shutdown_flag.store(true, Ordering::SeqCst);
            }
            if sender.send(result).is_err() {
                break;
            }
        }
    }

    fn execute_pool(
        &self,
        sequence: &FrameSequence,
        output_dir: &Path,
        workers: usize,
        progress: &Progress,
    ) -> Result<usize, Error> {
        info!("Upscaling with {} workers", workers);
        let shutdown_flag = AtomicBool::new(false);

        thread::scope(|scope| {
            let (frame_sender, frame_receiver) = bounded::<(usize, &FrameRef)>(workers);
            let (result_sender, result_receiver) = bounded(workers);

            for _ in 0..workers {
                let receiver = frame_receiver.clone();
                let sender = result_sender.clone();
                let shutdown_flag = &shutdown_flag;
                scope.spawn(move || self.process_incoming_frames(receiver, sender, output_dir, shutdown_flag));
            }
            drop(frame_receiver);
            drop(result_sender);

            scope.spawn(move || {
                for (position, frame) in sequence.iter().enumerate() {
                    if self.is_cancelled() || frame_sender.send((position, frame)).is_err() {
                        break;
                    }
                }
            });

            let mut completed = 0;
            let mut first_error = None;
            for result in result_receiver {
                match result {
                    Ok(position) => {
                        completed += 1;
                        progress.frame_done(position, completed);
                    }
                    Err(e) => {
                        shutdown_flag.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None if self.is_cancelled() && completed < sequence.len() => Err(Error::Cancelled),
                None => Ok(completed),
            }
        })
    }
}
