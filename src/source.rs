use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Bytes escaped when a key segment is put back into a URL path.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-decodes a request path once. Invalid UTF-8 is replaced rather
/// than rejected.
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Inverse of [`decode_path`] for store keys and canonical paths: every
/// `/`-separated segment is escaped, separators are kept.
pub fn encode_path(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Location of a source object, decomposed once from the request path.
///
/// The last `/` separates the prefix from the file name and the last `.` of
/// the file name separates the name from the extension, so `a/b/c.d.jpg`
/// parses as prefix `a/b`, name `c.d`, extension `jpg`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub prefix: Option<String>,
    pub name: String,
    pub extension: String,
}

impl SourceRef {
    /// Returns `None` when the path has no recognizable `name.extension`.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let (prefix, file) = match path.rsplit_once('/') {
            Some((prefix, file)) => (Some(prefix), file),
            None => (None, path),
        };
        let (name, extension) = file.rsplit_once('.')?;
        if name.is_empty() || extension.is_empty() {
            return None;
        }
        Some(Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_owned),
            name: name.to_owned(),
            extension: extension.to_owned(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.extension)
    }

    /// Object store key of the source itself.
    pub fn key(&self) -> String {
        self.key_with(&[])
    }

    /// `prefix/segments.../name.extension`, without a leading separator when
    /// there is no prefix.
    pub fn key_with(&self, segments: &[&str]) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(segments.len() + 2);
        if let Some(prefix) = &self.prefix {
            parts.push(prefix);
        }
        parts.extend_from_slice(segments);
        let file = self.file_name();
        parts.push(&file);
        parts.join("/")
    }
}
