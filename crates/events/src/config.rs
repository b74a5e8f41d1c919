use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::MessagingError;
use crate::reconnect::ReconnectConfig;

/// Which broker implementation a process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    /// A real AMQP 0.9.1 broker.
    Amqp,
    /// The in-process topic exchange; events never leave the process.
    Memory,
}

impl FromStr for BrokerMode {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amqp" => Ok(Self::Amqp),
            "memory" => Ok(Self::Memory),
            other => Err(MessagingError::Config(format!(
                "BROKER_MODE must be amqp or memory, got {other}"
            ))),
        }
    }
}

/// Broker connection settings loaded from environment variables.
///
/// All fields have defaults suitable for a local RabbitMQ with the stock
/// `guest` account.
#[derive(Clone)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    /// Name of the topic exchange shared by every producer and consumer.
    pub exchange: String,
    /// Declare the exchange and queues durable.
    pub durable: bool,
    pub connection_timeout: Duration,
    /// Default prefetch bound for consumers.
    pub prefetch_count: u16,
    pub reconnect: ReconnectConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Amqp,
            host: "localhost".into(),
            port: 5672,
            username: "guest".into(),
            password: "guest".into(),
            vhost: "/".into(),
            exchange: "fleet.events".into(),
            durable: true,
            connection_timeout: Duration::from_secs(10),
            prefetch_count: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default        |
    /// |----------------------------------|----------------|
    /// | `BROKER_MODE`                    | `amqp`         |
    /// | `BROKER_HOST`                    | `localhost`    |
    /// | `BROKER_PORT`                    | `5672`         |
    /// | `BROKER_USERNAME`                | `guest`        |
    /// | `BROKER_PASSWORD`                | `guest`        |
    /// | `BROKER_VHOST`                   | `/`            |
    /// | `BROKER_EXCHANGE`                | `fleet.events` |
    /// | `BROKER_DURABLE`                 | `true`         |
    /// | `BROKER_CONNECTION_TIMEOUT_SECS` | `10`           |
    /// | `BROKER_PREFETCH_COUNT`          | `10`           |
    /// | `BROKER_RECONNECT_INITIAL_MS`    | `1000`         |
    /// | `BROKER_RECONNECT_MAX_MS`        | `30000`        |
    pub fn from_env() -> Result<Self, MessagingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MessagingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        let mode = match lookup("BROKER_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.mode,
        };

        let prefetch_count: u16 =
            parse_var(&lookup, "BROKER_PREFETCH_COUNT", defaults.prefetch_count)?;
        if prefetch_count == 0 {
            return Err(MessagingError::Config(
                "BROKER_PREFETCH_COUNT must be at least 1".into(),
            ));
        }

        let initial_ms = parse_var(
            &lookup,
            "BROKER_RECONNECT_INITIAL_MS",
            defaults.reconnect.initial_delay.as_millis() as u64,
        )?;
        if initial_ms == 0 {
            return Err(MessagingError::Config(
                "BROKER_RECONNECT_INITIAL_MS must be at least 1".into(),
            ));
        }
        let max_ms = parse_var(
            &lookup,
            "BROKER_RECONNECT_MAX_MS",
            defaults.reconnect.max_delay.as_millis() as u64,
        )?;

        Ok(Self {
            mode,
            host: string("BROKER_HOST", defaults.host),
            port: parse_var(&lookup, "BROKER_PORT", defaults.port)?,
            username: string("BROKER_USERNAME", defaults.username),
            password: string("BROKER_PASSWORD", defaults.password),
            vhost: string("BROKER_VHOST", defaults.vhost),
            exchange: string("BROKER_EXCHANGE", defaults.exchange),
            durable: parse_var(&lookup, "BROKER_DURABLE", defaults.durable)?,
            connection_timeout: Duration::from_secs(parse_var(
                &lookup,
                "BROKER_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout.as_secs(),
            )?),
            prefetch_count,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms.max(initial_ms)),
                ..defaults.reconnect
            },
        })
    }

    /// Connection URI for the AMQP client.
    pub fn amqp_uri(&self) -> String {
        self.uri_with_password(&encode_component(&self.password))
    }

    /// The connection URI with the password masked, for log lines.
    pub fn redacted_uri(&self) -> String {
        self.uri_with_password("***")
    }

    fn uri_with_password(&self, password: &str) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            encode_component(&self.username),
            password,
            self.host,
            self.port,
            encode_component(&self.vhost),
        )
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("mode", &self.mode)
            .field("uri", &self.redacted_uri())
            .field("exchange", &self.exchange)
            .field("durable", &self.durable)
            .field("connection_timeout", &self.connection_timeout)
            .field("prefetch_count", &self.prefetch_count)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, MessagingError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MessagingError::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

/// Percent-encode a URI path or userinfo component.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{byte:02x}")),
        }
    }
    out
}
