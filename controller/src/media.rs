use room_common::{CommandSpec, MediaConfig, PipelineHealth, FIRST_CHANNEL, SILENT_CHANNEL};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    backend::{BackendError, Session, StreamBackend},
    pipeline::{Pipeline, StreamVars},
};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no backend session yet")]
    NotAuthenticated,
    #[error("channel list is empty")]
    NoChannels,
    #[error("channel {index} out of range (0..{len})")]
    InvalidChannel { index: usize, len: usize },
    #[error("stream lookup failed: {0}")]
    Backend(#[from] BackendError),
    #[error("bad stream url `{url}`: {source}")]
    StreamUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to start pipeline for {channel}: {source}")]
    Spawn {
        channel: String,
        #[source]
        source: std::io::Error,
    },
}

/// Owns the single fetch/decode pipeline and the current channel index.
pub struct MediaSupervisor {
    backend: Box<dyn StreamBackend>,
    fetcher: CommandSpec,
    decoder: CommandSpec,
    session: Option<Session>,
    current: usize,
    pipeline: Option<Pipeline>,
}

impl MediaSupervisor {
    pub fn new(backend: Box<dyn StreamBackend>, config: &MediaConfig) -> Self {
        Self {
            backend,
            fetcher: config.fetcher.clone(),
            decoder: config.decoder.clone(),
            session: None,
            current: SILENT_CHANNEL,
            pipeline: None,
        }
    }

    pub fn install_session(&mut self, session: Session) {
        info!(channels = session.channels.len().saturating_sub(1), "channel list installed");
        self.session = Some(session);
        self.current = SILENT_CHANNEL;
    }

    pub fn channels(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|session| session.channels.as_slice())
            .unwrap_or_default()
    }

    pub fn current_channel(&self) -> usize {
        self.current
    }

    pub fn is_alive(&mut self) -> bool {
        self.pipeline.as_mut().is_some_and(Pipeline::is_alive)
    }

    pub fn health(&mut self) -> PipelineHealth {
        PipelineHealth {
            alive: self.is_alive(),
            channel: self.current,
        }
    }

    /// Switches to `index`. Index 0 only silences. The previous pipeline is
    /// always gone before a new one is started.
    pub fn change_channel(&mut self, index: usize) -> Result<(), MediaError> {
        if index == SILENT_CHANNEL {
            self.kill_pipeline();
            self.current = SILENT_CHANNEL;
            return Ok(());
        }

        let session = self.session.as_ref().ok_or(MediaError::NotAuthenticated)?;
        let len = session.channels.len();
        let channel = session
            .channels
            .get(index)
            .cloned()
            .ok_or(MediaError::InvalidChannel { index, len })?;
        let (player_url, token) = (session.player_url.clone(), session.token.clone());

        self.current = index;
        let vars = match self.resolve(&channel, &player_url, &token) {
            Ok(vars) => vars,
            Err(err) => {
                // Leave a dead pipeline on the new index for self-heal.
                self.kill_pipeline();
                return Err(err);
            }
        };

        self.kill_pipeline();
        let pipeline = Pipeline::spawn(&self.fetcher, &self.decoder, &vars).map_err(|source| {
            MediaError::Spawn {
                channel: channel.clone(),
                source,
            }
        })?;
        self.pipeline = Some(pipeline);
        info!(channel = %channel, index, "tuned");
        Ok(())
    }

    /// Advances to the next channel while playing, wrapping past the end
    /// back to the first real channel. From silence or a dead pipeline it
    /// starts at channel 1.
    pub fn next_channel(&mut self) -> Result<(), MediaError> {
        let len = self.channels().len();
        if self.session.is_none() {
            return Err(MediaError::NotAuthenticated);
        }
        if len <= FIRST_CHANNEL {
            return Err(MediaError::NoChannels);
        }

        let next = if self.is_alive() {
            next_index(self.current, len)
        } else {
            FIRST_CHANNEL
        };
        self.change_channel(next)
    }

    pub fn stop(&mut self) {
        self.kill_pipeline();
        self.current = SILENT_CHANNEL;
    }

    fn resolve(&mut self, channel: &str, player_url: &str, token: &str) -> Result<StreamVars, MediaError> {
        let stream_url = self.backend.resolve_stream(channel)?;
        StreamVars::from_stream_url(&stream_url, player_url, token).map_err(|source| {
            MediaError::StreamUrl {
                url: stream_url.clone(),
                source,
            }
        })
    }

    fn kill_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.kill();
        }
    }
}

impl Drop for MediaSupervisor {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            warn!("media supervisor dropped with a live pipeline");
            self.kill_pipeline();
        }
    }
}

pub(crate) fn next_index(current: usize, len: usize) -> usize {
    let next = current + 1;
    if next >= len {
        FIRST_CHANNEL
    } else {
        next.max(FIRST_CHANNEL)
    }
}
