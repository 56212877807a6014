use std::{
    io,
    process::{Child, Command, Stdio},
};

use room_common::CommandSpec;
use tracing::{debug, warn};
use url::Url;

use crate::process::{forward_lines, Stream};

/// Values substituted into the fetcher and decoder templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamVars {
    pub url: String,
    pub rtmp: String,
    pub app: String,
    pub playpath: String,
    pub player_url: String,
    pub token: String,
}

impl StreamVars {
    /// Splits `scheme://host[:port]/app/.../playpath` into the pieces an RTMP
    /// client expects.
    pub fn from_stream_url(stream_url: &str, player_url: &str, token: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(stream_url)?;
        let host = parsed.host_str().unwrap_or_default();
        let rtmp = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };

        let segments: Vec<&str> = parsed
            .path()
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let (playpath, app) = match segments.split_last() {
            Some((last, rest)) => (last.to_string(), rest.join("/")),
            None => (String::new(), String::new()),
        };

        Ok(Self {
            url: stream_url.to_string(),
            rtmp,
            app,
            playpath,
            player_url: player_url.to_string(),
            token: token.to_string(),
        })
    }

    fn pairs(&self) -> [(&str, &str); 6] {
        [
            ("url", self.url.as_str()),
            ("rtmp", self.rtmp.as_str()),
            ("app", self.app.as_str()),
            ("playpath", self.playpath.as_str()),
            ("player_url", self.player_url.as_str()),
            ("token", self.token.as_str()),
        ]
    }
}

/// A fetcher process whose stdout feeds a decoder process.
#[derive(Debug)]
pub struct Pipeline {
    fetcher: Child,
    decoder: Child,
}

impl Pipeline {
    pub fn spawn(fetcher: &CommandSpec, decoder: &CommandSpec, vars: &StreamVars) -> io::Result<Self> {
        let pairs = vars.pairs();
        let fetcher_args = fetcher.render(&pairs);
        let decoder_args = decoder.render(&pairs);
        debug!(command = %fetcher.display(&fetcher_args), "starting fetcher");

        let mut fetcher_child = Command::new(&fetcher.program)
            .args(&fetcher_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(fetch_out) = fetcher_child.stdout.take() else {
            kill_and_reap(&mut fetcher_child);
            return Err(io::Error::new(io::ErrorKind::Other, "fetcher stdout not captured"));
        };
        if let Some(stderr) = fetcher_child.stderr.take() {
            forward_lines(stderr, &fetcher.program, Stream::Stderr);
        }

        debug!(command = %decoder.display(&decoder_args), "starting decoder");
        let decoder_child = Command::new(&decoder.program)
            .args(&decoder_args)
            .stdin(Stdio::from(fetch_out))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut decoder_child = match decoder_child {
            Ok(child) => child,
            Err(err) => {
                kill_and_reap(&mut fetcher_child);
                return Err(err);
            }
        };
        if let Some(stdout) = decoder_child.stdout.take() {
            forward_lines(stdout, &decoder.program, Stream::Stdout);
        }
        if let Some(stderr) = decoder_child.stderr.take() {
            forward_lines(stderr, &decoder.program, Stream::Stderr);
        }

        Ok(Self {
            fetcher: fetcher_child,
            decoder: decoder_child,
        })
    }

    /// True while both processes are still running.
    pub fn is_alive(&mut self) -> bool {
        running(&mut self.fetcher) && running(&mut self.decoder)
    }

    /// Decoder first so the audio device is released before the source goes.
    pub fn kill(mut self) {
        kill_and_reap(&mut self.decoder);
        kill_and_reap(&mut self.fetcher);
    }
}

fn running(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

fn kill_and_reap(child: &mut Child) {
    if running(child) {
        if let Err(err) = child.kill() {
            warn!(pid = child.id(), "failed to kill child: {err}");
        }
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{thread, time::Duration};

    fn vars() -> StreamVars {
        StreamVars::from_stream_url(
            "rtmpe://f-radiko.smartstream.ne.jp/TBS/_definst_/simul-stream.stream",
            "http://radiko.jp/player.swf",
            "tok",
        )
        .unwrap()
    }

    #[test]
    fn splits_rtmp_url() {
        let vars = vars();

        assert_eq!(vars.rtmp, "rtmpe://f-radiko.smartstream.ne.jp");
        assert_eq!(vars.app, "TBS/_definst_");
        assert_eq!(vars.playpath, "simul-stream.stream");
    }

    #[test]
    fn keeps_explicit_port() {
        let vars = StreamVars::from_stream_url("rtmp://example.org:1935/live/feed", "p", "t").unwrap();

        assert_eq!(vars.rtmp, "rtmp://example.org:1935");
        assert_eq!(vars.app, "live");
        assert_eq!(vars.playpath, "feed");
    }

    #[test]
    fn live_pipeline_reports_alive_until_killed() {
        let fetcher = CommandSpec::new("sleep", &["30"]);
        let decoder = CommandSpec::new("cat", &[]);
        let mut pipeline = Pipeline::spawn(&fetcher, &decoder, &vars()).unwrap();

        assert!(pipeline.is_alive());
        pipeline.kill();
    }

    #[test]
    fn exited_fetcher_is_not_alive() {
        let fetcher = CommandSpec::new("true", &[]);
        let decoder = CommandSpec::new("cat", &[]);
        let mut pipeline = Pipeline::spawn(&fetcher, &decoder, &vars()).unwrap();

        // `cat` sees EOF once `true` exits.
        let mut alive = true;
        for _ in 0..100 {
            alive = pipeline.is_alive();
            if !alive {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!alive);
        pipeline.kill();
    }

    #[test]
    fn missing_decoder_is_a_spawn_error() {
        let fetcher = CommandSpec::new("sleep", &["30"]);
        let decoder = CommandSpec::new("/nonexistent/decoder", &[]);

        assert!(Pipeline::spawn(&fetcher, &decoder, &vars()).is_err());
    }
}
