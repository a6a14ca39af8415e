use crate::utils;
use colored::Colorize;
use pkgdl::downloader::Reporter;
use std::{
    io::{self, IsTerminal, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

const REFRESH_INTERVAL: Duration = Duration::from_millis(150);

/// Single line progress display on stderr, canceled through a shared flag.
pub struct Progress {
    id: String,
    status: String,
    canceled: Arc<AtomicBool>,
    enabled: bool,
    drawn: bool,
    last_stat_time: Instant,
    last_stat_bytes: u64,
    speed: f64,
}

impl Progress {
    pub fn new(id: &str, canceled: Arc<AtomicBool>) -> Self {
        Self {
            id: id.to_owned(),
            status: String::new(),
            canceled,
            enabled: io::stderr().is_terminal(),
            drawn: false,
            last_stat_time: Instant::now(),
            last_stat_bytes: 0,
            speed: 0.0,
        }
    }

    pub fn set_id(&mut self, id: &str) {
        id.clone_into(&mut self.id);
    }

    fn draw(&mut self, offset: u64, total: u64) -> io::Result<()> {
        let remaining = total.saturating_sub(offset);
        let eta = if self.speed > 0.0 {
            (remaining as f64 / self.speed) as u64
        } else {
            0
        };
        let percent = if total > 0 {
            offset as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut handle = io::stderr().lock();

        if !self.drawn {
            write!(handle, "\x1B[?25l")?;
            self.drawn = true;
        }

        write!(
            handle,
            "\r\x1B[2K{}{} {} / {}{} DL:{} ETA:{}{} {}",
            "[".magenta(),
            self.id,
            utils::format_bytes(offset, 1),
            utils::format_bytes(total, 1),
            format!("({:.0}%)", percent).cyan(),
            format!("{}/s", utils::format_bytes(self.speed as u64, 1)).green(),
            utils::format_eta(eta).yellow(),
            "]".magenta(),
            self.status.dimmed(),
        )?;
        handle.flush()
    }
}

impl Reporter for Progress {
    fn update_progress(&mut self, offset: u64, total: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_stat_time);

        if elapsed < REFRESH_INTERVAL && offset < total {
            return;
        }

        if self.drawn && offset >= self.last_stat_bytes {
            self.speed = (offset - self.last_stat_bytes) as f64 / elapsed.as_secs_f64().max(0.001);
        }

        self.last_stat_time = now;
        self.last_stat_bytes = offset;

        if self.enabled {
            let _ = self.draw(offset, total);
        }
    }

    fn update_status(&mut self, status: &str) {
        status.clone_into(&mut self.status);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if self.drawn {
            let mut handle = io::stderr().lock();
            let _ = writeln!(handle, "\x1B[?25h");
            let _ = handle.flush();
        }
    }
}
