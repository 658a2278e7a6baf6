//! Optional leading key/value header block, with path-based inference as a
//! fallback. See SPEC_FULL.md §4.B.

use regex::Regex;
use std::sync::OnceLock;
use vibe_core::types::FOLDER_TYPE_MAP;

#[derive(Debug, Clone, Default)]
pub struct HeaderData {
    pub project: Option<String>,
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub updated: Option<String>,
    pub tags: Option<Vec<String>>,
    pub owner: Option<String>,
    pub feature: Option<String>,
}

fn status_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^Status:\s*(\S+)").unwrap())
}

/// Parse a leading `---`-delimited YAML header block from `content`. Parse
/// failure (malformed YAML, or no closing delimiter) is non-fatal: the
/// header is treated as absent and the entire original text is the body.
/// Unset fields are then inferred from `relative_path`'s segments, and for
/// task documents with no explicit status, from a `Status: <token>` line in
/// the body.
pub fn parse_header(content: &str, relative_path: &str) -> (HeaderData, String) {
    let mut data = HeaderData::default();
    let mut body = content.to_string();

    if let Some(rest) = content.strip_prefix("---") {
        if let Some(close_idx) = rest.find("\n---") {
            let yaml_block = &rest[..close_idx];
            let after = &rest[close_idx + 4..];
            match serde_yaml::from_str::<serde_yaml::Value>(yaml_block) {
                Ok(serde_yaml::Value::Mapping(map)) => {
                    data.project = yaml_str(&map, "project");
                    data.doc_type = yaml_str(&map, "type");
                    data.status = yaml_str(&map, "status");
                    data.updated = yaml_str(&map, "updated");
                    data.owner = yaml_str(&map, "owner");
                    data.feature = yaml_str(&map, "feature");
                    if let Some(serde_yaml::Value::Sequence(seq)) =
                        map.get(serde_yaml::Value::String("tags".to_string()))
                    {
                        data.tags = Some(
                            seq.iter()
                                .map(|v| yaml_scalar_to_string(v))
                                .collect(),
                        );
                    }
                    body = after.trim_start_matches('\n').to_string();
                }
                _ => {
                    // Malformed or non-mapping frontmatter: treat as absent.
                }
            }
        }
    }

    let segments: Vec<&str> = relative_path.split('/').collect();
    if segments.len() >= 2 {
        if data.project.is_none() {
            data.project = Some(segments[0].to_string());
        }
        let potential_folder = segments[1];
        if !potential_folder.ends_with(".md") {
            if data.doc_type.is_none() {
                if let Some((_, ty)) =
                    FOLDER_TYPE_MAP.iter().find(|(f, _)| *f == potential_folder)
                {
                    data.doc_type = Some((*ty).to_string());
                }
            }
        } else if potential_folder == "status.md" {
            data.doc_type = Some("status".to_string());
        }
    }

    if data.doc_type.as_deref() == Some("task") && data.status.is_none() {
        if let Some(caps) = status_pattern().captures(&body) {
            data.status = Some(caps[1].to_lowercase());
        }
    }

    (data, body)
}

/// Remove a leading `---`-delimited header block from `content`, if present.
pub fn strip_header(content: &str) -> String {
    if let Some(rest) = content.strip_prefix("---") {
        if let Some(close_idx) = rest.find("\n---") {
            let after = &rest[close_idx + 4..];
            return after.trim_start_matches('\n').to_string();
        }
    }
    content.to_string()
}

fn yaml_str(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(serde_yaml::Value::String(key.to_string()))
        .map(yaml_scalar_to_string)
}

fn yaml_scalar_to_string(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_and_strips_it() {
        let content = "---\nproject: p\ntype: plan\ntags: [a, b]\n---\n# T\nbody";
        let (data, body) = parse_header(content, "p/plans/x.md");
        assert_eq!(data.project.as_deref(), Some("p"));
        assert_eq!(data.doc_type.as_deref(), Some("plan"));
        assert_eq!(data.tags, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(body, "# T\nbody");
    }

    #[test]
    fn infers_task_status_from_body() {
        let content = "# T\nStatus: Done";
        let (data, _) = parse_header(content, "demo/tasks/001.md");
        assert_eq!(data.doc_type.as_deref(), Some("task"));
        assert_eq!(data.status.as_deref(), Some("done"));
    }

    #[test]
    fn status_md_infers_status_type() {
        let (data, _) = parse_header("# Status\n", "demo/status.md");
        assert_eq!(data.doc_type.as_deref(), Some("status"));
    }

    #[test]
    fn malformed_frontmatter_is_non_fatal() {
        let content = "---\n[unterminated\n# T\nbody";
        let (_, body) = parse_header(content, "demo/status.md");
        assert_eq!(body, content);
    }
}
