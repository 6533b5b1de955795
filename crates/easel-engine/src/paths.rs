use std::path::{Path, PathBuf};

use url::Url;

/// Last path segment of a URL, percent-decoded, with any query or fragment
/// dropped. `None` when the path ends in `/` or the URL does not parse.
pub fn url_basename(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let segment = parsed.path_segments()?.next_back()?.to_string();
    let decoded = urlencoding::decode(&segment)
        .map(|value| value.into_owned())
        .unwrap_or(segment);
    let name = Path::new(&decoded)
        .file_name()
        .and_then(|value| value.to_str())
        .map(str::to_string)?;
    if name.is_empty() {
        return None;
    }
    Some(name)
}

/// Destination name for the n-th result of a generation request:
/// `{prefix}_{index}_{basename}`.
pub fn generation_file_name(prefix: &str, index: usize, url: &str) -> String {
    let basename = url_basename(url).unwrap_or_else(random_image_name);
    format!("{prefix}_{index}_{basename}")
}

/// Destination for an outpaint result: the remote basename verbatim.
pub fn outpaint_destination(out_dir: &Path, url: &str) -> PathBuf {
    out_dir.join(url_basename(url).unwrap_or_else(random_image_name))
}

pub fn random_image_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("image_{}.png", &id[..8])
}
