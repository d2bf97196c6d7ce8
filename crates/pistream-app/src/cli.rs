//! Command line: single-dash flags and one positional host.

use std::fmt;
use std::path::PathBuf;

use pistream_av::DEFAULT_AUDIO_DEVICE;
use pistream_core::{ConfigError, StreamConfiguration};
use pistream_transport::connection::DEFAULT_APP;

pub const EXIT_OK: u8 = 0;
/// Bad flag value, unreadable input file or invalid stream configuration.
pub const EXIT_SYNTAX: u8 = 3;
pub const EXIT_USAGE: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stream,
    Pair,
    Unpair,
    Quit,
    List,
}

impl Action {
    fn flag(self) -> &'static str {
        match self {
            Self::Stream => "",
            Self::Pair => "-pair",
            Self::Unpair => "-unpair",
            Self::Quit => "-quit",
            Self::List => "-list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Warn,
    Trace,
}

impl Verbosity {
    /// Log filter used unless `RUST_LOG` is set.
    pub fn filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Warn => "warn",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub host: Option<String>,
    pub action: Action,
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub bitrate_kbps: u32,
    pub packet_size: u32,
    pub inputs: Vec<PathBuf>,
    pub mapping: Option<PathBuf>,
    pub audio: String,
    pub app: String,
    pub fake: bool,
    pub out: Option<PathBuf>,
    pub tests: bool,
    pub verbosity: Verbosity,
}

impl Default for Options {
    fn default() -> Self {
        let config = StreamConfiguration::default();
        Self {
            host: None,
            action: Action::Stream,
            width: config.width(),
            height: config.height(),
            refresh_hz: config.refresh_hz(),
            bitrate_kbps: config.bitrate_kbps(),
            packet_size: config.packet_size(),
            inputs: Vec::new(),
            mapping: None,
            audio: DEFAULT_AUDIO_DEVICE.to_owned(),
            app: DEFAULT_APP.to_owned(),
            fake: false,
            out: None,
            tests: true,
            verbosity: Verbosity::Quiet,
        }
    }
}

impl Options {
    pub fn stream_configuration(&self) -> Result<StreamConfiguration, ConfigError> {
        StreamConfiguration::new(
            self.width,
            self.height,
            self.refresh_hz,
            self.bitrate_kbps,
            self.packet_size,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    /// A flag is missing its value or the value is malformed.
    Syntax(String),
    /// The command line cannot be understood; usage should be printed.
    Usage(Vec<String>),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Syntax(_) => EXIT_SYNTAX,
            Self::Usage(_) => EXIT_USAGE,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(msg) => write!(f, "Syntax error: {msg}"),
            Self::Usage(problems) => {
                for problem in problems {
                    writeln!(f, "Syntax Error: {problem}")?;
                }
                f.write_str(&usage())
            }
        }
    }
}

pub fn usage() -> String {
    let lines = [
        "Usage: pistream [options] host",
        "\t-720\t\t\tUse 1280x720 resolution [default]",
        "\t-1080\t\t\tUse 1920x1080 resolution",
        "\t-width <width>\t\tHorizontal resolution (default 1280)",
        "\t-height <height>\tVertical resolution (default 720)",
        "\t-30fps\t\t\tUse 30fps",
        "\t-60fps\t\t\tUse 60fps [default]",
        "\t-bitrate <kbps>\t\tSpecify the bitrate in Kbps (default 10000)",
        "\t-packetsize <bytes>\tSpecify the packet size in bytes (default 1024)",
        "\t-input <device>\t\tUse <device> as input. Can be used multiple times",
        "\t\t\t\t[default uses all devices in /dev/input]",
        "\t-mapping <file>\t\tUse <file> as gamepad mapping configuration file",
        "\t-audio <device>\t\tUse <device> as ALSA audio output device (default \"default\")",
        "\t-app <name>\t\tStart the host app called <name> (default Steam)",
        "\t-fake\t\t\tDon't decode; write the video stream to a file",
        "\t-out <file>\t\tFile for -fake (default fake.h264)",
        "\t-notest\t\t\tOnly warn about environment problems",
        "\t-v / -vv\t\tMore logging",
        "",
        "\t-pair\t\t\tPair with host",
        "\t-unpair\t\t\tUnpair from host",
        "\t-quit\t\t\tQuit the app running on host",
        "\t-list\t\t\tList hosts on the local network (no host needed)",
        "",
        "Use ctrl-c to exit application",
    ];
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Parses everything after the program name.
pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Options, CliError> {
    let mut opts = Options::default();
    let mut problems = Vec::new();
    let mut args = args.iter().map(AsRef::<str>::as_ref);

    while let Some(arg) = args.next() {
        match arg {
            "-input" => opts.inputs.push(value(&mut args, "input device", arg)?.into()),
            "-mapping" => opts.mapping = Some(value(&mut args, "mapping file", arg)?.into()),
            "-audio" => opts.audio = value(&mut args, "audio device", arg)?.to_owned(),
            "-app" => opts.app = value(&mut args, "app name", arg)?.to_owned(),
            "-out" => opts.out = Some(value(&mut args, "output file", arg)?.into()),
            "-width" => opts.width = number(&mut args, "width", arg)?,
            "-height" => opts.height = number(&mut args, "height", arg)?,
            "-bitrate" => opts.bitrate_kbps = number(&mut args, "bitrate", arg)?,
            "-packetsize" => opts.packet_size = number(&mut args, "packetsize", arg)?,
            "-720" => {
                opts.width = 1280;
                opts.height = 720;
            }
            "-1080" => {
                opts.width = 1920;
                opts.height = 1080;
            }
            "-30fps" => opts.refresh_hz = 30,
            "-60fps" => opts.refresh_hz = 60,
            "-fake" => opts.fake = true,
            "-notest" => opts.tests = false,
            "-v" => opts.verbosity = Verbosity::Warn,
            "-vv" => opts.verbosity = Verbosity::Trace,
            "-pair" => set_action(&mut opts, Action::Pair, &mut problems),
            "-unpair" => set_action(&mut opts, Action::Unpair, &mut problems),
            "-quit" => set_action(&mut opts, Action::Quit, &mut problems),
            "-list" => set_action(&mut opts, Action::List, &mut problems),
            flag if flag.starts_with('-') => problems.push(format!("Unrecognized argument: {flag}")),
            host if opts.host.is_none() => opts.host = Some(host.to_owned()),
            extra => problems.push(format!("Unrecognized argument: {extra}")),
        }
    }

    if opts.host.is_none() && opts.action != Action::List {
        problems.push("Missing required host argument".to_owned());
    }
    if problems.is_empty() {
        Ok(opts)
    } else {
        Err(CliError::Usage(problems))
    }
}

fn value<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    what: &str,
    flag: &str,
) -> Result<&'a str, CliError> {
    args.next().ok_or_else(|| CliError::Syntax(format!("{what} expected after {flag}")))
}

fn number<'a>(args: &mut impl Iterator<Item = &'a str>, what: &str, flag: &str) -> Result<u32, CliError> {
    value(args, what, flag)?
        .parse()
        .map_err(|_| CliError::Syntax(format!("{what} must be a number")))
}

fn set_action(opts: &mut Options, action: Action, problems: &mut Vec<String>) {
    if opts.action != Action::Stream && opts.action != action {
        problems.push(format!("{} cannot be combined with {}", action.flag(), opts.action.flag()));
    }
    opts.action = action;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only_gives_defaults() {
        let opts = parse(&["10.0.0.5"]).unwrap();
        assert_eq!(opts.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(opts.action, Action::Stream);
        assert_eq!(opts.stream_configuration().unwrap(), StreamConfiguration::default());
        assert_eq!(opts.audio, "default");
        assert!(opts.tests);
    }

    #[test]
    fn flags_are_applied() {
        let opts = parse(&[
            "-1080", "-30fps", "-bitrate", "20000", "-packetsize", "1400", "-input",
            "/dev/input/event3", "-input", "/dev/input/event5", "-audio", "hw:1", "-notest", "-vv",
            "-app", "Desktop", "gaming-pc",
        ])
        .unwrap();
        let config = opts.stream_configuration().unwrap();
        assert_eq!((config.width(), config.height(), config.refresh_hz()), (1920, 1080, 30));
        assert_eq!((config.bitrate_kbps(), config.packet_size()), (20000, 1400));
        assert_eq!(
            opts.inputs,
            vec![PathBuf::from("/dev/input/event3"), PathBuf::from("/dev/input/event5")]
        );
        assert_eq!(opts.audio, "hw:1");
        assert_eq!(opts.app, "Desktop");
        assert!(!opts.tests);
        assert_eq!(opts.verbosity, Verbosity::Trace);
    }

    #[test]
    fn later_resolution_flags_win() {
        let opts = parse(&["-1080", "-width", "800", "host"]).unwrap();
        assert_eq!((opts.width, opts.height), (800, 1080));
    }

    #[test]
    fn zero_width_is_an_invalid_configuration() {
        let opts = parse(&["-width", "0", "host"]).unwrap();
        assert!(opts.stream_configuration().is_err());
    }

    #[test]
    fn oversized_packets_are_invalid() {
        let opts = parse(&["-packetsize", "1501", "host"]).unwrap();
        assert!(opts.stream_configuration().is_err());
    }

    #[test]
    fn missing_host_prints_usage() {
        let err = parse::<&str>(&[]).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_USAGE);
        assert!(err.to_string().contains("Missing required host argument"));
        assert!(err.to_string().contains("Usage: pistream [options] host"));
    }

    #[test]
    fn unrecognized_flag_prints_usage() {
        let err = parse(&["-nope", "host"]).unwrap_err();
        assert_eq!(err, CliError::Usage(vec!["Unrecognized argument: -nope".into()]));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn second_host_is_unrecognized() {
        let err = parse(&["a", "b"]).unwrap_err();
        assert_eq!(err, CliError::Usage(vec!["Unrecognized argument: b".into()]));
    }

    #[test]
    fn missing_or_bad_values_are_syntax_errors() {
        assert_eq!(
            parse(&["host", "-input"]).unwrap_err(),
            CliError::Syntax("input device expected after -input".into())
        );
        let err = parse(&["-width", "wide", "host"]).unwrap_err();
        assert_eq!(err, CliError::Syntax("width must be a number".into()));
        assert_eq!(err.exit_code(), EXIT_SYNTAX);
    }

    #[test]
    fn list_needs_no_host() {
        let opts = parse(&["-list"]).unwrap();
        assert_eq!(opts.action, Action::List);
        assert!(opts.host.is_none());
    }

    #[test]
    fn conflicting_actions_are_rejected() {
        let err = parse(&["-pair", "-quit", "host"]).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn fake_with_output() {
        let opts = parse(&["-fake", "-out", "/tmp/x.h264", "10.0.0.5"]).unwrap();
        assert!(opts.fake);
        assert_eq!(opts.out, Some(PathBuf::from("/tmp/x.h264")));
    }

    #[test]
    fn verbosity_filters() {
        assert_eq!(parse(&["host"]).unwrap().verbosity.filter(), "error");
        assert_eq!(parse(&["-v", "host"]).unwrap().verbosity.filter(), "warn");
    }
}
