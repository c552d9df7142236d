//! Slack mrkdwn rendering for drained event batches.

use pactbot_events::{PactEvent, PublicationEvent, StoredEvent, VerificationEvent, VerificationStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Events sharing one `{pacticipant}:{version}` key.
pub struct EventGroup {
    pub key: String,
    pub pacticipant: String,
    pub version: String,
    pub events: Vec<StoredEvent>,
}

impl EventGroup {
    pub fn verification_count(&self) -> usize {
        self.events
            .iter()
            .filter(|stored| stored.event.as_verification().is_some())
            .count()
    }

    pub fn failed_verification_count(&self) -> usize {
        self.events
            .iter()
            .filter_map(|stored| stored.event.as_verification())
            .filter(|event| !event.verification_status.is_success())
            .count()
    }
}

/// Groups events by pacticipant and version in first-seen order. Events in a
/// group are ordered by ingestion time.
pub fn group_events(events: &[StoredEvent]) -> Vec<EventGroup> {
    let mut groups: Vec<EventGroup> = Vec::new();
    for stored in events {
        let key = stored.event.group_key();
        match groups.iter_mut().find(|group| group.key == key) {
            Some(group) => group.events.push(stored.clone()),
            None => groups.push(EventGroup {
                key,
                pacticipant: stored.event.pacticipant().to_string(),
                version: stored.pacticipant_version_number().to_string(),
                events: vec![stored.clone()],
            }),
        }
    }
    for group in &mut groups {
        group.events.sort_by_key(|stored| stored.ts);
    }
    groups
}

pub fn status_emoji(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Success => ":white_check_mark:",
        VerificationStatus::Failure => ":x:",
        VerificationStatus::Pending => ":hourglass_flowing_sand:",
        VerificationStatus::Error => ":warning:",
    }
}

pub fn render_group_message(group: &EventGroup) -> String {
    let mut lines = Vec::with_capacity(group.events.len() + 1);
    let verifications = group.verification_count();
    let failed = group.failed_verification_count();
    let mut header = format!("*{}* `{}`", group.pacticipant, group.version);
    if verifications > 0 {
        header.push_str(&format!(
            " - {} verification{}",
            verifications,
            plural(verifications)
        ));
        if failed > 0 {
            header.push_str(&format!(", {failed} not successful"));
        }
    }
    lines.push(header);
    for stored in &group.events {
        lines.push(render_event_line(&stored.event));
    }
    lines.join("\n")
}

/// Reply body for verification results landing in an existing publication thread.
pub fn render_thread_reply(events: &[&StoredEvent]) -> String {
    events
        .iter()
        .filter_map(|stored| stored.event.as_verification())
        .map(render_verification_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_event_line(event: &PactEvent) -> String {
    match event {
        PactEvent::Verification(event) => render_verification_line(event),
        PactEvent::Publication(event) => render_publication_line(event),
    }
}

fn render_verification_line(event: &VerificationEvent) -> String {
    format!(
        "{} {} `{}`{} verified {} `{}`{}: {} (<{}|results>)",
        status_emoji(event.verification_status),
        event.provider_name,
        event.provider_version_number,
        branch_suffix(event.provider_version_branch.as_deref()),
        event.consumer_name,
        event.consumer_version_number,
        branch_suffix(event.consumer_version_branch.as_deref()),
        event.verification_status.as_str(),
        event.verification_result_url
    )
}

fn render_publication_line(event: &PublicationEvent) -> String {
    let mut line = format!(
        ":page_facing_up: {} `{}`{} published a pact for {} (<{}|pact>)",
        event.consumer_name,
        event.consumer_version_number,
        branch_suffix(event.consumer_version_branch.as_deref()),
        event.provider_name,
        event.pact_url
    );
    if !event.provider_version_descriptions.is_empty() {
        line.push_str(&format!(
            "\n    verifying against: {}",
            event.provider_version_descriptions.join(", ")
        ));
    }
    line
}

fn branch_suffix(branch: Option<&str>) -> String {
    match branch.map(str::trim).filter(|value| !value.is_empty()) {
        Some(branch) => format!(" ({branch})"),
        None => String::new(),
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
