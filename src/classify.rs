//! Filename-based preview classification.
//!
//! Maps an entry's extension to the kind of preview a consumer can build
//! from its bytes. The table is data; the engine never interprets the
//! bytes themselves.

/// Preview kind derived from a filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    Text,
    Code,
    Image,
    Video,
    Audio,
    Pdf,
    Document,
    Spreadsheet,
    Presentation,
    Font,
    Unsupported,
}

impl PreviewKind {
    /// Whether the preview is rendered from decoded UTF-8 text.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Code)
    }
}

const IMAGE: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "bmp", "ico", "avif",
];

const VIDEO: &[&str] = &[
    "mp4", "webm", "mov", "avi", "mkv", "flv", "wmv", "m4v", "3gp", "3g2", "mpg", "mpeg", "ogg",
];

const AUDIO: &[&str] = &[
    "mp3", "wav", "flac", "aac", "m4a", "opus", "wma", "aiff", "aif", "mid", "midi",
];

const DOCUMENT: &[&str] = &["docx", "doc", "odt", "rtf", "pages"];

const SPREADSHEET: &[&str] = &["xlsx", "xls", "ods", "csv", "tsv", "numbers"];

const PRESENTATION: &[&str] = &["pptx", "ppt", "odp", "key"];

const FONT: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];

const TEXT: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "text", "license", "readme", "adoc", "org",
];

const CODE: &[&str] = &[
    "rs", "c", "h", "cpp", "cc", "hpp", "cs", "java", "kt", "kts", "scala", "go", "py", "rb",
    "php", "swift", "m", "mm", "js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "html",
    "htm", "css", "scss", "sass", "less", "xml", "json", "jsonc", "yaml", "yml", "toml", "ini",
    "cfg", "conf", "properties", "env", "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd", "sql",
    "graphql", "proto", "dockerfile", "makefile", "cmake", "gradle", "lock", "lua", "pl", "r",
    "dart", "ex", "exs", "erl", "hs", "ml", "clj", "cljs", "edn", "zig", "nim", "v", "tf", "hcl",
    "vim", "diff", "patch", "gitignore", "gitattributes", "editorconfig",
];

/// Classify a path by its extension.
///
/// Extension matching is case-insensitive. Extensionless files that carry a
/// well-known name (`Makefile`, `Dockerfile`, `LICENSE`) classify by that
/// name instead.
pub fn classify(path: &str) -> PreviewKind {
    let name = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path);
    let lower = name.to_ascii_lowercase();

    let ext = match lower.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => lower.clone(),
    };

    if IMAGE.contains(&ext.as_str()) {
        PreviewKind::Image
    } else if VIDEO.contains(&ext.as_str()) {
        PreviewKind::Video
    } else if AUDIO.contains(&ext.as_str()) {
        PreviewKind::Audio
    } else if ext == "pdf" {
        PreviewKind::Pdf
    } else if DOCUMENT.contains(&ext.as_str()) {
        PreviewKind::Document
    } else if SPREADSHEET.contains(&ext.as_str()) {
        PreviewKind::Spreadsheet
    } else if PRESENTATION.contains(&ext.as_str()) {
        PreviewKind::Presentation
    } else if FONT.contains(&ext.as_str()) {
        PreviewKind::Font
    } else if TEXT.contains(&ext.as_str()) {
        PreviewKind::Text
    } else if CODE.contains(&ext.as_str()) {
        PreviewKind::Code
    } else {
        PreviewKind::Unsupported
    }
}

/// MIME type for serving an entry over HTTP, by extension.
pub fn mime_type(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mpg" | "mpeg" => "video/mpeg",
        "ogg" => "video/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "opus" => "audio/opus",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "txt" | "md" | "log" => "text/plain",
        _ => "application/octet-stream",
    }
}
