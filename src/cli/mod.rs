use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Backend Connection Args ---
    /// Base URL of the chat backend (e.g., http://127.0.0.1:55551)
    #[arg(long, env = "BRANCH_CHAT_URL", default_value = "http://127.0.0.1:55551")]
    pub base_url: String,

    /// Password for the backend login form. Login is skipped when unset.
    #[arg(long, env = "APP_PASSWORD")]
    pub password: Option<String>,

    /// Timeout in seconds for regular (non-streaming) requests.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    // --- Streaming Args ---
    /// Number of decoded stream events buffered between the reader task and the session.
    #[arg(long, env = "STREAM_BUFFER", default_value = "64")]
    pub stream_buffer: usize,

    /// Seconds without any data on an open response stream before it counts as broken.
    #[arg(long, env = "STREAM_IDLE_TIMEOUT_SECS", default_value = "120")]
    pub stream_idle_timeout_secs: u64,

    /// Upper bound of already-buffered events folded into a single render update.
    #[arg(long, env = "MAX_COALESCED_EVENTS", default_value = "32")]
    pub max_coalesced_events: usize,

    /// Reload the chat tree from the backend after every edit.
    #[arg(long, env = "REFETCH_AFTER_EDIT", default_value_t = true, action = clap::ArgAction::Set)]
    pub refetch_after_edit: bool,

    // --- Driver Args ---
    /// Chat to open. Defaults to the most recent chat.
    #[arg(long, env = "BRANCH_CHAT_ID")]
    pub chat: Option<String>,

    /// Message to send once the chat is open.
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Start a new chat instead of opening an existing one.
    #[arg(long, default_value = "false")]
    pub new_chat: bool,
}
