//! Outbound notifications: Pushover messages and Healthchecks.io pings.
//!
//! Delivery is best effort. A failed notification is logged and the run goes on.

use crate::client::{agent, map_ureq_error};
use crate::config::{HealthchecksConfig, PushoverConfig};
use crate::error::ConnectivityError;
use crate::models::health::Alert;
use crate::utils::{fmt_opt, truncate};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use std::time::Duration;

const PUSHOVER: &str = "pushover";
const HEALTHCHECKS: &str = "healthchecks";
const HEALTHCHECKS_MSG_MAX: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    /// One debounced alert that just fired.
    Alert(Alert),
    /// End-of-run liveness signal; `failing` lists subjects at or above the alert threshold.
    RunStatus { failing: Vec<String> },
    DailySummary {
        date: NaiveDate,
        energy_wh: Option<f64>,
        text: String,
    },
    Test { healthy: bool, at: DateTime<Utc> },
}

pub trait Notify {
    fn name(&self) -> &'static str;

    /// `Ok(false)` when the event is not meant for this channel.
    fn notify(&self, event: &NotificationEvent) -> Result<bool, ConnectivityError>;
}

pub fn alert_text(alert: &Alert) -> (String, String) {
    let title = format!("Solar alert: {}", alert.subject);
    let body = format!(
        "{} ({}): {} after {} consecutive check(s), PAC={}. {}",
        alert.inverter,
        alert.serial.as_deref().unwrap_or("unknown serial"),
        alert.reason,
        alert.consecutive_failures,
        fmt_opt(alert.pac_w, 0, " W"),
        alert.message
    );
    (title, body)
}

pub struct Pushover {
    agent: ureq::Agent,
    api_url: String,
    token: String,
    user: String,
    priority: i8,
}

impl Pushover {
    pub fn new(cfg: &PushoverConfig) -> Result<Self, ConnectivityError> {
        let (Some(token), Some(user)) = (cfg.token.clone(), cfg.user.clone()) else {
            return Err(ConnectivityError::NotConfigured { source_name: PUSHOVER });
        };
        Ok(Pushover {
            agent: agent(Duration::from_secs_f64(cfg.timeout_secs)),
            api_url: cfg.api_url.clone(),
            token,
            user,
            priority: cfg.priority,
        })
    }

    fn post(&self, title: &str, message: &str) -> Result<(), ConnectivityError> {
        let priority = self.priority.to_string();
        let mut response = self
            .agent
            .post(&self.api_url)
            .send_form([
                ("token", self.token.as_str()),
                ("user", self.user.as_str()),
                ("title", title),
                ("message", message),
                ("priority", priority.as_str()),
            ])
            .map_err(|e| map_ureq_error(PUSHOVER, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(ConnectivityError::Http {
                source_name: PUSHOVER,
                status: status.as_u16(),
                message: truncate(body.trim(), 200),
            });
        }
        info!("[Pushover] Sent: {}", title);
        Ok(())
    }
}

impl Notify for Pushover {
    fn name(&self) -> &'static str {
        PUSHOVER
    }

    fn notify(&self, event: &NotificationEvent) -> Result<bool, ConnectivityError> {
        match event {
            NotificationEvent::Alert(alert) => {
                let (title, body) = alert_text(alert);
                self.post(&title, &body)?;
            }
            NotificationEvent::DailySummary { date, energy_wh, text } => {
                let kwh = energy_wh.unwrap_or(0.0) / 1000.0;
                self.post(&format!("Daily production {}: {:.2} kWh", date, kwh), text)?;
            }
            NotificationEvent::Test { healthy, at } => {
                let kind = if *healthy { "healthy" } else { "fault" };
                let body = format!("Test {} message from solar-sentinel at {}", kind, at.format("%Y-%m-%d %H:%M:%S UTC"));
                self.post("Solar monitor test", &body)?;
            }
            NotificationEvent::RunStatus { .. } => return Ok(false),
        }
        Ok(true)
    }
}

pub struct Healthchecks {
    agent: ureq::Agent,
    ping_url: String,
}

impl Healthchecks {
    pub fn new(cfg: &HealthchecksConfig) -> Result<Self, ConnectivityError> {
        let Some(url) = cfg.ping_url.as_deref().map(|u| u.trim_end_matches('/')).filter(|u| !u.is_empty()) else {
            return Err(ConnectivityError::NotConfigured {
                source_name: HEALTHCHECKS,
            });
        };
        Ok(Healthchecks {
            agent: agent(Duration::from_secs_f64(cfg.timeout_secs)),
            ping_url: url.to_string(),
        })
    }

    fn ping_url(&self, healthy: bool) -> String {
        if healthy {
            self.ping_url.clone()
        } else {
            format!("{}/fail", self.ping_url)
        }
    }

    fn ping(&self, healthy: bool, message: &str) -> Result<(), ConnectivityError> {
        let url = self.ping_url(healthy);
        let response = self
            .agent
            .get(&url)
            .query("msg", truncate(message, HEALTHCHECKS_MSG_MAX))
            .call()
            .map_err(|e| map_ureq_error(HEALTHCHECKS, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectivityError::Http {
                source_name: HEALTHCHECKS,
                status: status.as_u16(),
                message: String::new(),
            });
        }
        debug!("[Healthchecks] {} ping sent", if healthy { "success" } else { "failure" });
        Ok(())
    }
}

pub fn run_status_message(failing: &[String]) -> String {
    if failing.is_empty() {
        "system ok".to_string()
    } else {
        format!("alerting: {}", failing.join(", "))
    }
}

impl Notify for Healthchecks {
    fn name(&self) -> &'static str {
        HEALTHCHECKS
    }

    fn notify(&self, event: &NotificationEvent) -> Result<bool, ConnectivityError> {
        match event {
            NotificationEvent::RunStatus { failing } => {
                self.ping(failing.is_empty(), &run_status_message(failing))?;
            }
            NotificationEvent::Test { healthy, at } => {
                let msg = format!("Test ping from solar-sentinel at {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                self.ping(*healthy, &msg)?;
            }
            NotificationEvent::Alert(_) | NotificationEvent::DailySummary { .. } => return Ok(false),
        }
        Ok(true)
    }
}

/// Fans events out to every configured channel.
#[derive(Default)]
pub struct NotificationManager {
    channels: Vec<Box<dyn Notify>>,
}

impl NotificationManager {
    pub fn new(channels: Vec<Box<dyn Notify>>) -> Self {
        NotificationManager { channels }
    }

    /// Channels that are enabled but lack credentials are skipped with a warning.
    pub fn from_config(pushover: &PushoverConfig, healthchecks: &HealthchecksConfig) -> Self {
        let mut channels: Vec<Box<dyn Notify>> = Vec::new();
        if pushover.enabled {
            match Pushover::new(pushover) {
                Ok(p) => channels.push(Box::new(p)),
                Err(e) => warn!("Pushover disabled: {}", e),
            }
        }
        if healthchecks.enabled {
            match Healthchecks::new(healthchecks) {
                Ok(h) => channels.push(Box::new(h)),
                Err(e) => warn!("Healthchecks disabled: {}", e),
            }
        }
        NotificationManager { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Number of channels that delivered the event.
    pub fn dispatch(&self, event: &NotificationEvent) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            match channel.notify(event) {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => warn!("[{}] notification failed: {}", channel.name(), e),
            }
        }
        delivered
    }
}
