//! Parsing of the failover URI surface: `failover:(tcp://h1:p1,tcp://h2:p2,...)?opts`.
//! `Url::parse` plus a `query_pairs()` walk mapped through a
//! `FailoverOpt`/`WireFormatOpt` enum, feeding a builder.

use crate::command::wire_format_info::{MAX_VERSION, MIN_VERSION};
use crate::command::WireFormatInfo;
use crate::error::{CoreError, CoreResult};
use std::time::Duration;
use url::Url;

/// Per-endpoint TCP socket configuration, the query string carried on
/// each inner `tcp://host:port` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpEndpointParams {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub so_linger: Option<i32>,
    pub so_keep_alive: Option<bool>,
    pub so_receive_buffer_size: Option<u32>,
    pub so_send_buffer_size: Option<u32>,
    pub tcp_no_delay: bool,
    pub input_buffer_size: u32,
    pub output_buffer_size: u32,
    pub trace: bool,
}

impl TcpEndpointParams {
    fn defaults(host: String, port: u16) -> Self {
        TcpEndpointParams {
            host,
            port,
            connect_timeout: None,
            so_linger: None,
            so_keep_alive: None,
            so_receive_buffer_size: None,
            so_send_buffer_size: None,
            tcp_no_delay: true,
            input_buffer_size: 8192,
            output_buffer_size: 8192,
            trace: false,
        }
    }
}

/// Parsed `failover:(...)?opts` connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverParams {
    pub endpoints: Vec<TcpEndpointParams>,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub back_off_multiplier: f64,
    pub use_exponential_back_off: bool,
    pub max_reconnect_attempts: Option<u32>,
    pub startup_max_reconnect_attempts: Option<u32>,
    pub randomize: bool,
    pub backup: bool,
    pub backup_pool_size: usize,
    pub track_messages: bool,
    pub max_cache_size: usize,
    pub timeout: Option<Duration>,
    pub priority_backup: bool,
    pub wire_format: WireFormatInfo,
}

/// Construct with [`FailoverParamsBuilder::new`], apply query-string
/// options, then [`FailoverParamsBuilder::build`].
#[derive(Debug, Clone)]
pub struct FailoverParamsBuilder {
    endpoints: Vec<TcpEndpointParams>,
    initial_reconnect_delay_ms: u64,
    max_reconnect_delay_ms: u64,
    back_off_multiplier: f64,
    use_exponential_back_off: bool,
    max_reconnect_attempts: Option<u32>,
    startup_max_reconnect_attempts: Option<u32>,
    randomize: bool,
    backup: bool,
    backup_pool_size: usize,
    track_messages: bool,
    max_cache_size: usize,
    timeout_ms: Option<u64>,
    priority_backup: bool,
    wire_format: WireFormatInfo,
}

impl FailoverParamsBuilder {
    pub fn new() -> Self {
        FailoverParamsBuilder {
            endpoints: Vec::new(),
            initial_reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 30_000,
            back_off_multiplier: 2.0,
            use_exponential_back_off: true,
            max_reconnect_attempts: None,
            startup_max_reconnect_attempts: None,
            randomize: true,
            backup: false,
            backup_pool_size: 1,
            track_messages: false,
            max_cache_size: 256,
            timeout_ms: None,
            priority_backup: false,
            wire_format: WireFormatInfo::default(),
        }
    }

    pub fn endpoint(&mut self, ep: TcpEndpointParams) -> &mut Self {
        self.endpoints.push(ep);
        self
    }

    pub fn build(&self) -> CoreResult<FailoverParams> {
        if self.endpoints.is_empty() {
            return Err(CoreError::ConnParams(
                "failover URI requires at least one endpoint".into(),
            ));
        }
        Ok(FailoverParams {
            endpoints: self.endpoints.clone(),
            initial_reconnect_delay: Duration::from_millis(self.initial_reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            back_off_multiplier: self.back_off_multiplier,
            use_exponential_back_off: self.use_exponential_back_off,
            max_reconnect_attempts: self.max_reconnect_attempts,
            startup_max_reconnect_attempts: self.startup_max_reconnect_attempts,
            randomize: self.randomize,
            backup: self.backup,
            backup_pool_size: self.backup_pool_size,
            track_messages: self.track_messages,
            max_cache_size: self.max_cache_size,
            timeout: self.timeout_ms.map(Duration::from_millis),
            priority_backup: self.priority_backup,
            wire_format: self.wire_format,
        })
    }
}

impl Default for FailoverParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Recognised failover-level query options (outer `?opts` after the
/// closing paren).
enum FailoverOpt {
    InitialReconnectDelay,
    MaxReconnectDelay,
    BackOffMultiplier,
    UseExponentialBackOff,
    MaxReconnectAttempts,
    StartupMaxReconnectAttempts,
    Randomize,
    Backup,
    BackupPoolSize,
    TrackMessages,
    MaxCacheSize,
    Timeout,
    PriorityBackup,
    WireFormat(WireFormatOpt),
}

enum WireFormatOpt {
    StackTraceEnabled,
    CacheEnabled,
    TcpNoDelayEnabled,
    TightEncodingEnabled,
    SizePrefixDisabled,
    MaxInactivityDuration,
    MaxInactivityDurationInitialDelay,
    MaxFrameSize,
}

impl FailoverOpt {
    fn from(name: &str) -> Option<Self> {
        use FailoverOpt::*;
        Some(match name {
            "initialReconnectDelay" => InitialReconnectDelay,
            "maxReconnectDelay" => MaxReconnectDelay,
            "backOffMultiplier" => BackOffMultiplier,
            "useExponentialBackOff" => UseExponentialBackOff,
            "maxReconnectAttempts" => MaxReconnectAttempts,
            "startupMaxReconnectAttempts" => StartupMaxReconnectAttempts,
            "randomize" => Randomize,
            "backup" => Backup,
            "backupPoolSize" => BackupPoolSize,
            "trackMessages" => TrackMessages,
            "maxCacheSize" => MaxCacheSize,
            "timeout" => Timeout,
            "priorityBackup" => PriorityBackup,
            "wireFormat.stackTraceEnabled" => WireFormat(WireFormatOpt::StackTraceEnabled),
            "wireFormat.cacheEnabled" => WireFormat(WireFormatOpt::CacheEnabled),
            "wireFormat.tcpNoDelayEnabled" => WireFormat(WireFormatOpt::TcpNoDelayEnabled),
            "wireFormat.tightEncodingEnabled" => WireFormat(WireFormatOpt::TightEncodingEnabled),
            "wireFormat.sizePrefixDisabled" => WireFormat(WireFormatOpt::SizePrefixDisabled),
            "wireFormat.maxInactivityDuration" => WireFormat(WireFormatOpt::MaxInactivityDuration),
            "wireFormat.maxInactivityDurationInitalDelay" => {
                WireFormat(WireFormatOpt::MaxInactivityDurationInitialDelay)
            }
            "wireFormat.maxFrameSize" => WireFormat(WireFormatOpt::MaxFrameSize),
            _ => return None,
        })
    }
}

fn parse_bool(value: &str) -> CoreResult<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(CoreError::ConnParams(format!(
            "expected true/false/1/0, got '{other}'"
        ))),
    }
}

fn parse_u64(value: &str) -> CoreResult<u64> {
    value
        .parse()
        .map_err(|_| CoreError::ConnParams(format!("expected an integer, got '{value}'")))
}

fn parse_u32(value: &str) -> CoreResult<u32> {
    value
        .parse()
        .map_err(|_| CoreError::ConnParams(format!("expected an integer, got '{value}'")))
}

fn parse_f64(value: &str) -> CoreResult<f64> {
    value
        .parse()
        .map_err(|_| CoreError::ConnParams(format!("expected a number, got '{value}'")))
}

/// Runs `query_pairs()` over a synthetic URL built from a raw query
/// string: the failover scheme's parenthesised endpoint list isn't
/// itself a valid URL, so the outer options are lifted into a throwaway
/// one first.
fn query_pairs_of(raw_query: &str) -> CoreResult<Vec<(String, String)>> {
    let synthetic = Url::parse(&format!("x://x?{raw_query}"))
        .map_err(|e| CoreError::ConnParams(format!("malformed query string: {e}")))?;
    Ok(synthetic
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect())
}

fn apply_endpoint_option(ep: &mut TcpEndpointParams, name: &str, value: &str) -> CoreResult<()> {
    match name {
        "connectTimeout" => ep.connect_timeout = Some(Duration::from_millis(parse_u64(value)?)),
        "soLinger" => {
            ep.so_linger = Some(
                value
                    .parse()
                    .map_err(|_| CoreError::ConnParams(format!("invalid soLinger '{value}'")))?,
            )
        }
        "soKeepAlive" => ep.so_keep_alive = Some(parse_bool(value)?),
        "soReceiveBufferSize" => ep.so_receive_buffer_size = Some(parse_u32(value)?),
        "soSendBufferSize" => ep.so_send_buffer_size = Some(parse_u32(value)?),
        "tcpNoDelay" => ep.tcp_no_delay = parse_bool(value)?,
        "inputBufferSize" => ep.input_buffer_size = parse_u32(value)?,
        "outputBufferSize" => ep.output_buffer_size = parse_u32(value)?,
        "trace" => ep.trace = parse_bool(value)?,
        other => {
            return Err(CoreError::ConnParams(format!(
                "unknown per-endpoint option '{other}'"
            )))
        }
    }
    Ok(())
}

fn parse_endpoint(raw: &str) -> CoreResult<TcpEndpointParams> {
    let url = Url::parse(raw)
        .map_err(|e| CoreError::ConnParams(format!("invalid endpoint URI '{raw}': {e}")))?;
    if url.scheme() != "tcp" {
        return Err(CoreError::ConnParams(format!(
            "unsupported endpoint scheme '{}', only 'tcp' is supported",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| CoreError::ConnParams(format!("endpoint URI '{raw}' is missing a host")))?
        .to_string();
    let port = url
        .port()
        .ok_or_else(|| CoreError::ConnParams(format!("endpoint URI '{raw}' is missing a port")))?;
    let mut ep = TcpEndpointParams::defaults(host, port);
    for (name, value) in url.query_pairs() {
        apply_endpoint_option(&mut ep, name.as_ref(), value.as_ref())?;
    }
    Ok(ep)
}

fn apply_wire_format_option(wf: &mut WireFormatInfo, opt: WireFormatOpt, value: &str) -> CoreResult<()> {
    match opt {
        WireFormatOpt::StackTraceEnabled => wf.stack_trace_enabled = parse_bool(value)?,
        WireFormatOpt::CacheEnabled => wf.cache_enabled = parse_bool(value)?,
        WireFormatOpt::TcpNoDelayEnabled => wf.tcp_no_delay_enabled = parse_bool(value)?,
        WireFormatOpt::TightEncodingEnabled => wf.tight_encoding_enabled = parse_bool(value)?,
        WireFormatOpt::SizePrefixDisabled => wf.size_prefix_disabled = parse_bool(value)?,
        WireFormatOpt::MaxInactivityDuration => wf.max_inactivity_duration_ms = parse_u64(value)?,
        WireFormatOpt::MaxInactivityDurationInitialDelay => {
            wf.max_inactivity_duration_initial_delay_ms = parse_u64(value)?
        }
        WireFormatOpt::MaxFrameSize => wf.max_frame_size = parse_u64(value)?,
    }
    Ok(())
}

/// Parses a `failover:(tcp://h1:p1,tcp://h2:p2,...)?opts` connection
/// string into a [`FailoverParams`].
pub fn parse_failover_uri(raw: &str) -> CoreResult<FailoverParams> {
    let rest = raw
        .strip_prefix("failover:")
        .ok_or_else(|| CoreError::ConnParams("expected a 'failover:' URI".into()))?;
    let rest = rest
        .strip_prefix('(')
        .ok_or_else(|| CoreError::ConnParams("expected '(' after 'failover:'".into()))?;
    let close = rest
        .find(')')
        .ok_or_else(|| CoreError::ConnParams("unterminated endpoint list, missing ')'".into()))?;
    let (endpoint_list, tail) = rest.split_at(close);
    let tail = &tail[1..]; // drop the ')'

    let mut builder = FailoverParamsBuilder::new();
    for raw_endpoint in endpoint_list.split(',') {
        let raw_endpoint = raw_endpoint.trim();
        if raw_endpoint.is_empty() {
            continue;
        }
        builder.endpoint(parse_endpoint(raw_endpoint)?);
    }

    if let Some(query) = tail.strip_prefix('?') {
        for (name, value) in query_pairs_of(query)? {
            match FailoverOpt::from(&name) {
                Some(FailoverOpt::InitialReconnectDelay) => {
                    builder.initial_reconnect_delay_ms = parse_u64(&value)?
                }
                Some(FailoverOpt::MaxReconnectDelay) => {
                    builder.max_reconnect_delay_ms = parse_u64(&value)?
                }
                Some(FailoverOpt::BackOffMultiplier) => {
                    builder.back_off_multiplier = parse_f64(&value)?
                }
                Some(FailoverOpt::UseExponentialBackOff) => {
                    builder.use_exponential_back_off = parse_bool(&value)?
                }
                Some(FailoverOpt::MaxReconnectAttempts) => {
                    builder.max_reconnect_attempts = Some(parse_u32(&value)?)
                }
                Some(FailoverOpt::StartupMaxReconnectAttempts) => {
                    builder.startup_max_reconnect_attempts = Some(parse_u32(&value)?)
                }
                Some(FailoverOpt::Randomize) => builder.randomize = parse_bool(&value)?,
                Some(FailoverOpt::Backup) => builder.backup = parse_bool(&value)?,
                Some(FailoverOpt::BackupPoolSize) => {
                    builder.backup_pool_size = parse_u32(&value)? as usize
                }
                Some(FailoverOpt::TrackMessages) => builder.track_messages = parse_bool(&value)?,
                Some(FailoverOpt::MaxCacheSize) => {
                    builder.max_cache_size = parse_u32(&value)? as usize
                }
                Some(FailoverOpt::Timeout) => builder.timeout_ms = Some(parse_u64(&value)?),
                Some(FailoverOpt::PriorityBackup) => builder.priority_backup = parse_bool(&value)?,
                Some(FailoverOpt::WireFormat(wf_opt)) => {
                    apply_wire_format_option(&mut builder.wire_format, wf_opt, &value)?
                }
                None => {
                    return Err(CoreError::ConnParams(format!(
                        "option '{name}' not supported"
                    )))
                }
            }
        }
    }

    if !(MIN_VERSION..=MAX_VERSION).contains(&builder.wire_format.version) {
        return Err(CoreError::ConnParams(format!(
            "wire format version {} outside supported range {MIN_VERSION}..={MAX_VERSION}",
            builder.wire_format.version
        )));
    }

    builder.build()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_two_endpoints_and_defaults() {
        let params = parse_failover_uri("failover:(tcp://a:61616,tcp://b:61617)").unwrap();
        assert_eq!(params.endpoints.len(), 2);
        assert_eq!(params.endpoints[0].host, "a");
        assert_eq!(params.endpoints[0].port, 61616);
        assert!(params.randomize);
        assert_eq!(params.backup_pool_size, 1);
    }

    #[test]
    fn parses_outer_and_per_endpoint_options() {
        let params = parse_failover_uri(
            "failover:(tcp://a:61616?tcpNoDelay=false&trace=true)?randomize=false&backupPoolSize=3&wireFormat.maxInactivityDuration=0",
        )
        .unwrap();
        assert!(!params.randomize);
        assert_eq!(params.backup_pool_size, 3);
        assert_eq!(params.wire_format.max_inactivity_duration_ms, 0);
        assert!(!params.endpoints[0].tcp_no_delay);
        assert!(params.endpoints[0].trace);
    }

    #[test]
    fn rejects_unknown_option() {
        assert!(parse_failover_uri("failover:(tcp://a:1)?bogus=1").is_err());
    }

    #[test]
    fn rejects_non_tcp_endpoint_scheme() {
        assert!(parse_failover_uri("failover:(udp://a:1)").is_err());
    }
}
