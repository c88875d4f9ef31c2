use serde::{Deserialize, Deserializer, Serialize};

/// Jira sends `null` for empty fields; treat it like an absent one.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An issue-tracker ticket, shaped like a Jira REST v3 issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub fields: TicketFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketFields {
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: StatusRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<AdfNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TicketRef>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub subtasks: Vec<TicketRef>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachment: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<TrackerUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuetype: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub name: String,
}

/// Lightweight reference to a parent or sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRef {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<TicketRefFields>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketRefFields {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: StatusRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerUser {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// One node of an Atlassian Document Format tree.
///
/// Only the parts the dashboard reads or writes are modeled; marks and
/// attributes are dropped on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdfNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<AdfNode>,
}

impl AdfNode {
    fn node(kind: &str, content: Vec<AdfNode>) -> Self {
        Self {
            kind: kind.to_string(),
            version: None,
            text: None,
            content,
        }
    }

    /// Build a document with one paragraph per input line.
    pub fn doc_from_plain_text(text: &str) -> Self {
        let paragraphs = text
            .lines()
            .map(|line| {
                let inline = if line.is_empty() {
                    Vec::new()
                } else {
                    vec![Self {
                        kind: "text".to_string(),
                        version: None,
                        text: Some(line.to_string()),
                        content: Vec::new(),
                    }]
                };
                Self::node("paragraph", inline)
            })
            .collect();
        Self {
            version: Some(1),
            ..Self::node("doc", paragraphs)
        }
    }

    /// Flatten the tree to plain text, one line per block node.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out.trim_end().to_string()
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        if self.kind == "hardBreak" {
            out.push('\n');
        }
        for child in &self.content {
            child.collect_text(out);
        }
        if matches!(
            self.kind.as_str(),
            "paragraph" | "heading" | "codeBlock" | "listItem" | "blockquote"
        ) {
            out.push('\n');
        }
    }
}

impl Ticket {
    pub fn summary(&self) -> &str {
        &self.fields.summary
    }

    pub fn status_name(&self) -> &str {
        &self.fields.status.name
    }

    pub fn description_text(&self) -> Option<String> {
        self.fields.description.as_ref().map(AdfNode::plain_text)
    }
}
