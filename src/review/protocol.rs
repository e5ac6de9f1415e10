//! Review server duplex protocol: JSON text frames, one per
//! message, tagged by a `type` field so both directions deserialize
//! through a single enum each.

use serde::{Deserialize, Serialize};

use crate::model::{FileContent, ProgressEvent, RemoteFileContent, TreeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Git,
    Remote,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTargetSummary {
    pub host: String,
    pub dest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadButtonState {
    Checking,
    NoChanges,
    ConnectionError,
    Enabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStateData {
    pub disabled: bool,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserCancel,
    ConnectionClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteData {
    pub success_targets: u64,
    pub failed_targets: u64,
    pub total_files: u64,
    pub total_size: u64,
    pub total_duration_millis: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteStatus {
    pub exists: bool,
    pub has_changes: bool,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Init {
        base: String,
        target: String,
        diff_mode: bool,
        files: Vec<FileSummary>,
        summary: Summary,
        remote_targets: Vec<RemoteTargetSummary>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tree: Option<Vec<TreeNode>>,
        lazy_loading: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        upload_button_state: Option<UploadButtonState>,
    },
    FileResponse {
        path: String,
        request_type: RequestType,
        #[serde(skip_serializing_if = "Option::is_none")]
        base: Option<FileContent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<FileContent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        local: Option<FileContent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remote: Option<RemoteContentWire>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remote_status: Option<RemoteStatus>,
    },
    DirectoryContents {
        path: String,
        children: Vec<TreeNode>,
    },
    Progress {
        data: ProgressEvent,
    },
    Complete {
        data: CompleteData,
    },
    Cancelled,
    Error {
        message: String,
    },
    UploadState {
        data: UploadStateData,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteContentWire {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub is_binary: bool,
    pub size: u64,
}

impl RemoteContentWire {
    pub fn from_remote(remote: Option<RemoteFileContent>) -> Self {
        match remote {
            None => Self { exists: false, content: None, is_binary: false, size: 0 },
            Some(content) => {
                let is_binary = crate::model::is_binary(&content.content);
                let as_text = if is_binary {
                    None
                } else {
                    Some(String::from_utf8_lossy(&content.content).into_owned())
                };
                Self { exists: true, content: as_text, is_binary, size: content.size }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub status: crate::model::DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

/// Client → server frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    FileRequest { path: String, request_type: RequestType },
    ExpandDirectory { path: String },
    Confirm,
    Cancel,
    SwitchTarget { target_index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_confirm_round_trips() {
        let json = r#"{"type":"confirm"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, ClientFrame::Confirm));
    }

    #[test]
    fn client_frame_file_request_parses_fields() {
        let json = r#"{"type":"file_request","path":"a.txt","request_type":"remote"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::FileRequest { path, request_type } => {
                assert_eq!(path, "a.txt");
                assert_eq!(request_type, RequestType::Remote);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_frame_cancelled_serializes_with_type_tag() {
        let frame = ServerFrame::Cancelled;
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"cancelled"}"#);
    }
}
