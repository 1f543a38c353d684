//! Background track playback through an external player process.
//!
//! Pausing stops the player with `SIGSTOP` and resuming continues it with
//! `SIGCONT`, so playback picks up where it left off. A player that has run
//! to the end of the track is started again on the next `play`.

use crate::error::FilterError;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

pub struct AudioPlayer {
    command: Vec<String>,
    asset: PathBuf,
    child: Option<Child>,
    playing: bool,
}

impl AudioPlayer {
    /// `command` is the player invocation; the asset path is appended to it.
    pub fn load(asset: &Path, command: &[String]) -> Result<Self, FilterError> {
        if !asset.is_file() {
            return Err(FilterError::AudioAssetMissing(asset.to_path_buf()));
        }
        Ok(Self {
            command: command.to_vec(),
            asset: asset.to_path_buf(),
            child: None,
            playing: false,
        })
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) -> Result<()> {
        if self.playing && self.running()? {
            return Ok(());
        }
        if self.child.is_some() && self.running()? {
            self.signal(libc::SIGCONT).context("resuming player")?;
            debug!("audio resumed");
        } else {
            self.spawn()?;
            debug!("audio started");
        }
        self.playing = true;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if !self.playing {
            return Ok(());
        }
        if self.running()? {
            self.signal(libc::SIGSTOP).context("pausing player")?;
            debug!("audio paused");
        }
        self.playing = false;
        Ok(())
    }

    fn spawn(&mut self) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("audio player command is empty"))?;
        let child = Command::new(program)
            .args(args)
            .arg(&self.asset)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("starting audio player {}", program))?;
        self.child = Some(child);
        Ok(())
    }

    /// Whether the current child is still alive; reaps it if not.
    fn running(&mut self) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        match child.try_wait().context("polling audio player")? {
            None => Ok(true),
            Some(status) => {
                debug!("audio player exited: {}", status);
                self.child = None;
                Ok(false)
            }
        }
    }

    fn signal(&self, sig: libc::c_int) -> std::io::Result<()> {
        let Some(child) = self.child.as_ref() else {
            return Ok(());
        };
        let ret = unsafe { libc::kill(child.id() as libc::pid_t, sig) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // a stopped process does not act on SIGKILL until continued
            unsafe {
                libc::kill(child.id() as libc::pid_t, libc::SIGCONT);
            }
            if let Err(e) = child.kill() {
                warn!("failed to stop audio player: {}", e);
            }
            child.wait().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "facefilter-{}-{}.mp3",
            name,
            std::process::id()
        ));
        std::fs::write(&path, b"not really audio").unwrap();
        path
    }

    fn sleeper() -> Vec<String> {
        // `sleep 30 <asset>` would fail on the extra argument, so go through sh
        vec!["sh".into(), "-c".into(), "sleep 30".into()]
    }

    #[test]
    fn missing_asset_is_reported() {
        let err = AudioPlayer::load(Path::new("/nonexistent/ben10.mp3"), &sleeper())
            .err()
            .unwrap();
        assert!(matches!(err, FilterError::AudioAssetMissing(_)));
    }

    #[test]
    fn play_pause_resume_keeps_one_process() {
        let asset = asset("resume");
        let mut player = AudioPlayer::load(&asset, &sleeper()).unwrap();
        player.play().unwrap();
        let pid = player.child.as_ref().unwrap().id();
        player.play().unwrap();
        assert_eq!(player.child.as_ref().unwrap().id(), pid);

        player.pause().unwrap();
        assert!(!player.is_playing());
        player.pause().unwrap();

        player.play().unwrap();
        assert!(player.is_playing());
        assert_eq!(player.child.as_ref().unwrap().id(), pid);
        drop(player);
        std::fs::remove_file(asset).ok();
    }

    #[test]
    fn finished_player_is_restarted() {
        let asset = asset("restart");
        let mut player =
            AudioPlayer::load(&asset, &["sh".into(), "-c".into(), "exit 0".into()]).unwrap();
        player.play().unwrap();
        player.child.as_mut().unwrap().wait().unwrap();
        // reaped by the next poll, then spawned fresh
        player.pause().unwrap();
        player.play().unwrap();
        assert!(player.is_playing());
        std::fs::remove_file(asset).ok();
    }

    #[test]
    fn empty_command_fails_to_play() {
        let asset = asset("empty");
        let mut player = AudioPlayer::load(&asset, &[]).unwrap();
        assert!(player.play().is_err());
        assert!(!player.is_playing());
        std::fs::remove_file(asset).ok();
    }
}
