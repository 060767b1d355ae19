//! Server dispatch engine

use assuan_proto::{AssuanError, Channel, ErrorCode, Line, ProtoError, ProtoResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, trace};

use crate::{Handler, HandlerResult, Profile, StreamError};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The channel stream handlers are given
pub type ServerChannel = Channel<BoxReader, BoxWriter>;

/// Commands the engine answers itself, in `HELP` order
pub const BUILTIN_COMMANDS: [&str; 7] = ["NOP", "OPTION", "CANCEL", "BYE", "RESET", "END", "HELP"];

/// Run one session over a reader/writer pair.
///
/// Returns the reason the session ended; a peer hang-up is
/// [`ProtoError::Closed`]. Handler and peer errors never end it.
pub async fn serve<S, R, W>(reader: R, writer: W, profile: &Profile<S>) -> ProtoError
where
    S: Send + 'static,
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let reader: BoxReader = Box::new(reader);
    let writer: BoxWriter = Box::new(writer);
    serve_channel(Channel::new(reader, writer), profile).await
}

/// Serve on this process's stdin/stdout, for servers spawned over pipes.
pub async fn serve_stdio<S: Send + 'static>(profile: &Profile<S>) -> ProtoError {
    serve(tokio::io::stdin(), tokio::io::stdout(), profile).await
}

pub async fn serve_channel<S: Send + 'static>(
    mut channel: ServerChannel,
    profile: &Profile<S>,
) -> ProtoError {
    debug!("Accepted session");
    let mut state = profile.new_state();

    if let Err(e) = channel.write_ok(profile.greeting()).await {
        debug!(error = %e, "I/O error, dropping session");
        return e;
    }

    loop {
        let line = match channel.read_line().await {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Session ended");
                return e;
            }
        };

        if let Err(e) = dispatch(&mut channel, profile, &mut state, &line).await {
            debug!(error = %e, "Channel failed, dropping session");
            return e;
        }
    }
}

/// Handle one command, writing exactly one terminal line.
///
/// Only transport failures are returned.
async fn dispatch<S: Send + 'static>(
    channel: &mut ServerChannel,
    profile: &Profile<S>,
    state: &mut S,
    line: &Line,
) -> ProtoResult<()> {
    let command = line.command.as_str();
    let Some(params) = line.params_str() else {
        debug!(command, "Parameters are not valid UTF-8");
        let err = AssuanError::protocol(ErrorCode::ASS_PARAMETER, "invalid parameter encoding");
        return channel.write_error(&err).await;
    };

    let outcome = match command {
        "NOP" => Ok(()),
        "BYE" => {
            info!("Session finished by peer");
            Ok(())
        }
        "RESET" if profile.handler(command).is_none() => {
            debug!("Session reset");
            *state = profile.new_state();
            Ok(())
        }
        "OPTION" => set_option(profile, state, params),
        "HELP" => return help(channel, profile, params).await,
        _ => match profile.handler(command) {
            Some(handler) => {
                debug!(command, params_len = params.len(), "Protocol command received");
                run_handler(channel, handler, state, params).await?
            }
            None => {
                debug!(command, "Unknown command");
                Err(AssuanError::protocol(
                    ErrorCode::ASS_UNKNOWN_CMD,
                    "unknown ipc command",
                ))
            }
        },
    };

    match outcome {
        Ok(()) => channel.write_ok("").await,
        Err(err) => {
            debug!(command, error = %err, "Command failed");
            channel.write_error(&err).await
        }
    }
}

async fn run_handler<S: Send + 'static>(
    channel: &mut ServerChannel,
    handler: &Handler<S>,
    state: &mut S,
    params: &str,
) -> ProtoResult<HandlerResult> {
    let payload = match handler {
        Handler::Plain(f) => f(params),
        Handler::Data(f) => f(state, params),
        Handler::State(f) => return Ok(f(state, params)),
        Handler::Stream(h) => {
            return match h.handle(channel, state, params).await {
                Ok(()) => Ok(Ok(())),
                Err(StreamError::Command(e)) => Ok(Err(e)),
                Err(StreamError::Transport(e)) => Err(e),
            };
        }
    };
    match payload {
        Ok(data) => {
            channel.write_data(&data).await?;
            Ok(Ok(()))
        }
        Err(e) => Ok(Err(e)),
    }
}

fn set_option<S: Send + 'static>(profile: &Profile<S>, state: &mut S, params: &str) -> HandlerResult {
    if !profile.has_option_setter() {
        debug!("No options supported in this protocol");
        return Err(AssuanError::protocol(
            ErrorCode::NOT_IMPLEMENTED,
            "not implemented",
        ));
    }

    let (key, value) = split_option(params)?;
    trace!(key, value_len = value.len(), "Option set request");
    profile
        .set_option(state, key, value)
        .unwrap_or(Ok(()))
}

fn is_option_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Split `OPTION` parameters into key and value.
///
/// Accepts `key`, `key value`, `key=value` and `key = value`.
pub fn split_option(params: &str) -> Result<(&str, &str), AssuanError> {
    let invalid = || AssuanError::protocol(ErrorCode::ASS_INV_VALUE, "invalid OPTION syntax");

    let key_len = params
        .find(|c: char| !is_option_key_char(c))
        .unwrap_or(params.len());
    if key_len == 0 {
        return Err(invalid());
    }
    let (key, rest) = params.split_at(key_len);

    if rest.is_empty() {
        return Ok((key, ""));
    }
    if !rest.starts_with([' ', '=']) {
        return Err(invalid());
    }

    let value = rest.trim_start_matches(' ');
    let value = value.strip_prefix('=').unwrap_or(value);
    Ok((key, value.trim_start_matches(' ')))
}

async fn help<S: Send + 'static>(
    channel: &mut ServerChannel,
    profile: &Profile<S>,
    params: &str,
) -> ProtoResult<()> {
    let topic = params.trim();
    if topic.is_empty() {
        debug!("Help request");
        for name in BUILTIN_COMMANDS {
            channel.write_comment(name).await?;
        }
        for name in profile.command_names() {
            channel.write_comment(name).await?;
        }
        return channel.write_ok("").await;
    }

    match profile.help_lines(&topic.to_ascii_uppercase()) {
        Some(lines) => {
            for line in lines {
                channel.write_comment(line).await?;
            }
            channel.write_ok("").await
        }
        None => {
            debug!(topic, "Help requested for unknown command");
            let err = AssuanError::protocol(ErrorCode::NOT_FOUND, "not found");
            channel.write_error(&err).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{inquire_one, Inquiries, IpcError, Session, StreamHandler, StreamResult};
    use assuan_proto::{decode_error, write_line, ErrorSource, LineReader};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct Desk {
        desc: String,
        tty: Option<String>,
        secret: Vec<u8>,
    }

    struct AskSecret;

    #[async_trait]
    impl StreamHandler<Desk> for AskSecret {
        async fn handle(
            &self,
            channel: &mut ServerChannel,
            state: &mut Desk,
            _params: &str,
        ) -> StreamResult {
            channel.write_status("NEEDPIN", "").await?;
            state.secret = inquire_one(channel, "SECRET").await?;
            Ok(())
        }
    }

    fn profile() -> Profile<Desk> {
        Profile::builder(Desk::default)
            .greeting("test server")
            .state("SETDESC", |s, params| {
                s.desc = params.to_string();
                Ok(())
            })
            .data("GETDESC", |s, _| Ok(s.desc.clone().into_bytes()))
            .data("GREET", |_, _| Ok(b"hello\nworld".to_vec()))
            .plain("FAIL", |_| {
                Err(AssuanError::new(
                    ErrorSource::PINENTRY,
                    ErrorCode::CANCELED,
                    "pinentry",
                    "Operation cancelled",
                ))
            })
            .stream("ASK", AskSecret)
            .data("GETSECRET", |s, _| Ok(s.secret.clone()))
            .help("SETDESC", ["Set request description", "Takes one argument"])
            .option_setter(|s, key, value| match key {
                "ttyname" => {
                    s.tty = Some(value.to_string());
                    Ok(())
                }
                _ => Err(AssuanError::new(
                    ErrorSource::GPG_AGENT,
                    ErrorCode::UNKNOWN_OPTION,
                    "gpg agent",
                    "Unknown option",
                )),
            })
            .build()
    }

    type Raw = Channel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn start(profile: Profile<Desk>) -> (Raw, JoinHandle<ProtoError>) {
        let profile = Arc::new(profile);
        let (a, b) = duplex(64 * 1024);
        let (sr, sw) = split(a);
        let (cr, cw) = split(b);
        let task = tokio::spawn(async move { serve(sr, sw, &profile).await });
        (Channel::new(cr, cw), task)
    }

    async fn start_session(
        profile: Profile<Desk>,
    ) -> (
        Session<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>,
        JoinHandle<ProtoError>,
    ) {
        let (raw, task) = start(profile);
        let (r, w) = raw.into_parts();
        (Session::init(r, w).await.unwrap(), task)
    }

    #[tokio::test]
    async fn greets_with_profile_text() {
        let (session, _task) = start_session(profile()).await;
        assert_eq!(session.greeting(), "test server");
    }

    #[tokio::test]
    async fn simple_and_state_commands() {
        let (mut session, _task) = start_session(profile()).await;
        assert!(session.simple_command("NOP", "").await.unwrap().is_empty());
        session.simple_command("SETDESC", "Enter 100% of it").await.unwrap();
        let desc = session.simple_command("GETDESC", "").await.unwrap();
        assert_eq!(desc, b"Enter 100% of it".to_vec());
    }

    #[tokio::test]
    async fn data_command_sends_escaped_lines() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("GREET", "").await.unwrap();
        let data = raw.read_line().await.unwrap();
        assert_eq!(data, Line::new("D", b"hello\nworld".to_vec()));
        assert!(raw.read_line().await.unwrap().is("OK"));
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("BOGUS", "").await.unwrap();
        let line = raw.read_line().await.unwrap();
        assert!(line.is("ERR"));
        assert_eq!(
            line.params_str(),
            Some("536871187 unknown ipc command <assuan>")
        );
    }

    #[tokio::test]
    async fn handler_error_is_single_err_line() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("FAIL", "").await.unwrap();
        let line = raw.read_line().await.unwrap();
        let err = decode_error(line.params_str().unwrap()).unwrap();
        assert_eq!(err.code, ErrorCode::CANCELED);
        assert_eq!(err.source_name, "pinentry");

        raw.write_line("NOP", "").await.unwrap();
        assert!(raw.read_line().await.unwrap().is("OK"));
    }

    #[tokio::test]
    async fn malformed_option_gets_exactly_one_err() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("OPTION", "1$2").await.unwrap();
        let line = raw.read_line().await.unwrap();
        assert!(line.is("ERR"));
        let err = decode_error(line.params_str().unwrap()).unwrap();
        assert_eq!(err.code, ErrorCode::ASS_INV_VALUE);

        // The next response must belong to the next command
        raw.write_line("NOP", "").await.unwrap();
        assert!(raw.read_line().await.unwrap().is("OK"));
    }

    #[tokio::test]
    async fn rejected_option_gets_exactly_one_err() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("OPTION", "lc-bogus=1").await.unwrap();
        let err = decode_error(raw.read_line().await.unwrap().params_str().unwrap()).unwrap();
        assert_eq!(err.code, ErrorCode::UNKNOWN_OPTION);

        raw.write_line("NOP", "").await.unwrap();
        assert!(raw.read_line().await.unwrap().is("OK"));
    }

    #[tokio::test]
    async fn option_without_setter_is_not_implemented() {
        let (mut session, _task) = start_session(Profile::builder(Desk::default).build()).await;
        let err = session.option("ttyname", "/dev/tty1").await.unwrap_err();
        assert_eq!(err.assuan().unwrap().code, ErrorCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn option_from_client_reaches_setter() {
        let profile = Profile::builder(Desk::default)
            .option_setter(|s, key, value| {
                s.tty = Some(format!("{key}={value}"));
                Ok(())
            })
            .data("TTY", |s, _| Ok(s.tty.clone().unwrap_or_default().into_bytes()))
            .build();
        let (mut session, _task) = start_session(profile).await;

        session.option("ttyname", "/dev/pts/3").await.unwrap();
        let tty = session.simple_command("TTY", "").await.unwrap();
        assert_eq!(tty, b"ttyname=/dev/pts/3".to_vec());
    }

    #[tokio::test]
    async fn reset_replaces_state() {
        let (mut session, _task) = start_session(profile()).await;
        session.simple_command("SETDESC", "something").await.unwrap();
        session.reset().await.unwrap();
        let desc = session.simple_command("GETDESC", "").await.unwrap();
        assert!(desc.is_empty());
    }

    #[tokio::test]
    async fn registered_reset_handler_takes_over() {
        let profile = Profile::builder(Desk::default)
            .state("SETDESC", |s, p| {
                s.desc = p.to_string();
                Ok(())
            })
            .data("GETDESC", |s, _| Ok(s.desc.clone().into_bytes()))
            .state("RESET", |s, _| {
                s.desc.push_str(" (kept)");
                Ok(())
            })
            .build();
        let (mut session, _task) = start_session(profile).await;

        session.simple_command("SETDESC", "desc").await.unwrap();
        session.reset().await.unwrap();
        let desc = session.simple_command("GETDESC", "").await.unwrap();
        assert_eq!(desc, b"desc (kept)".to_vec());
    }

    /// HELP output is comment lines, which `read_line` filters, so read raw.
    async fn start_raw_reader(
        profile: Profile<Desk>,
    ) -> (LineReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>, JoinHandle<ProtoError>) {
        let (raw, task) = start(profile);
        let (r, w) = raw.into_parts();
        let mut reader = LineReader::new(r);
        assert_eq!(reader.read_raw_line().await.unwrap(), b"OK test server".to_vec());
        (reader, w, task)
    }

    async fn next_raw(reader: &mut LineReader<ReadHalf<DuplexStream>>) -> String {
        String::from_utf8(reader.read_raw_line().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn help_lists_builtins_then_handlers() {
        let (mut reader, mut w, _task) = start_raw_reader(profile()).await;

        write_line(&mut w, "HELP", "").await.unwrap();
        let mut names = Vec::new();
        loop {
            let line = next_raw(&mut reader).await;
            if line == "OK" {
                break;
            }
            names.push(line.trim_start_matches("# ").to_string());
        }
        assert_eq!(
            names,
            vec![
                "NOP", "OPTION", "CANCEL", "BYE", "RESET", "END", "HELP", "ASK", "FAIL",
                "GETDESC", "GETSECRET", "GREET", "SETDESC"
            ]
        );
    }

    #[tokio::test]
    async fn help_for_command() {
        let (mut reader, mut w, _task) = start_raw_reader(profile()).await;

        write_line(&mut w, "HELP", "setdesc").await.unwrap();
        assert_eq!(next_raw(&mut reader).await, "# Set request description");
        assert_eq!(next_raw(&mut reader).await, "# Takes one argument");
        assert_eq!(next_raw(&mut reader).await, "OK");

        write_line(&mut w, "HELP", "GETDESC").await.unwrap();
        let line = reader.read_line().await.unwrap();
        let err = decode_error(line.params_str().unwrap()).unwrap();
        assert_eq!(err.code, ErrorCode::NOT_FOUND);
        assert_eq!(err.source_id, ErrorSource::ASSUAN);
    }

    #[tokio::test]
    async fn inquiry_roundtrip() {
        let (mut session, _task) = start_session(profile()).await;
        let mut inquiries = Inquiries::new().with_bytes("SECRET", b"s3cr%t".to_vec());
        session.transact("ASK", "", &mut inquiries).await.unwrap();

        let secret = session.simple_command("GETSECRET", "").await.unwrap();
        assert_eq!(secret, b"s3cr%t".to_vec());
    }

    #[tokio::test]
    async fn inquiry_refusal_is_canceled() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("ASK", "").await.unwrap();
        let inquire = raw.read_line().await.unwrap();
        assert_eq!(inquire, Line::new("INQUIRE", b"SECRET".to_vec()));
        raw.write_cancel().await.unwrap();

        let err = decode_error(raw.read_line().await.unwrap().params_str().unwrap()).unwrap();
        assert_eq!(err.code, ErrorCode::ASS_CANCELED);

        raw.write_line("NOP", "").await.unwrap();
        assert!(raw.read_line().await.unwrap().is("OK"));
    }

    #[tokio::test]
    async fn missing_inquiry_data_leaves_session_usable() {
        let (mut session, _task) = start_session(profile()).await;
        let mut inquiries = Inquiries::new();
        let err = session.transact("ASK", "", &mut inquiries).await.unwrap_err();
        assert!(matches!(err, IpcError::MissingInquiryData(k) if k == "SECRET"));
        session.simple_command("NOP", "").await.unwrap();
    }

    #[tokio::test]
    async fn bye_keeps_reading_until_hangup() {
        let (mut raw, task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("BYE", "").await.unwrap();
        assert!(raw.read_line().await.unwrap().is("OK"));

        raw.write_line("NOP", "").await.unwrap();
        assert!(raw.read_line().await.unwrap().is("OK"));

        drop(raw);
        assert!(matches!(task.await.unwrap(), ProtoError::Closed));
    }

    #[tokio::test]
    async fn non_utf8_params_are_rejected() {
        let (mut raw, _task) = start(profile());
        raw.read_line().await.unwrap();

        raw.write_line("SETDESC", [0xffu8, 0xfe]).await.unwrap();
        let err = decode_error(raw.read_line().await.unwrap().params_str().unwrap()).unwrap();
        assert_eq!(err.code, ErrorCode::ASS_PARAMETER);
    }

    #[tokio::test]
    async fn overlong_line_ends_session() {
        let (_reader, mut w, task) = start_raw_reader(profile()).await;

        w.write_all(&vec![b'A'; 2000]).await.unwrap();
        w.write_all(b"\n").await.unwrap();
        assert!(matches!(
            task.await.unwrap(),
            ProtoError::LineTooLong { .. }
        ));
    }

    async fn ask_for_secret(
        reader: &mut LineReader<ReadHalf<DuplexStream>>,
        w: &mut WriteHalf<DuplexStream>,
    ) {
        write_line(w, "ASK", "").await.unwrap();
        assert_eq!(next_raw(reader).await, "S NEEDPIN");
        assert_eq!(next_raw(reader).await, "INQUIRE SECRET");
    }

    #[tokio::test]
    async fn overlong_inquiry_data_ends_session() {
        let (mut reader, mut w, task) = start_raw_reader(profile()).await;
        ask_for_secret(&mut reader, &mut w).await;

        let mut head = b"D ".to_vec();
        head.extend(vec![b'A'; 900]);
        w.write_all(&head).await.unwrap();
        w.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut tail = vec![b'B'; 200];
        tail.extend_from_slice(b"\nNOP\n");
        w.write_all(&tail).await.unwrap();

        assert!(matches!(
            task.await.unwrap(),
            ProtoError::LineTooLong { .. }
        ));
        // No ERR for ASK and nothing for the trailing NOP
        assert!(matches!(reader.read_raw_line().await, Err(ProtoError::Closed)));
    }

    #[tokio::test]
    async fn malformed_inquiry_data_ends_session() {
        let (mut reader, mut w, task) = start_raw_reader(profile()).await;
        ask_for_secret(&mut reader, &mut w).await;

        w.write_all(b"D bad%zz\nNOP\n").await.unwrap();

        assert!(matches!(task.await.unwrap(), ProtoError::MalformedEscape));
        assert!(matches!(reader.read_raw_line().await, Err(ProtoError::Closed)));
    }

    #[test]
    fn option_syntax() {
        assert_eq!(split_option("ttyname").unwrap(), ("ttyname", ""));
        assert_eq!(split_option("ttyname /dev/tty").unwrap(), ("ttyname", "/dev/tty"));
        assert_eq!(split_option("lc-ctype=C").unwrap(), ("lc-ctype", "C"));
        assert_eq!(split_option("display = :0").unwrap(), ("display", ":0"));
        assert_eq!(split_option("a_b = x = y").unwrap(), ("a_b", "x = y"));
        assert!(split_option("1$2").is_err());
        assert!(split_option("").is_err());
        assert!(split_option("=value").is_err());
    }
}
