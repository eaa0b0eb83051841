use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use url::Url;

use crate::server::error::{AppResult, Error};

const PLAYLIST_TAG: &str = "p:";
const SEGMENT_TAG: &str = "s:";

/// What a rewritten playlist line points back at.
///
/// `Segment::directory` is either a path relative to the configured origin (`a/b`, the
/// domain is dropped) or an absolute directory url for segments hosted somewhere else.
/// It never ends in `/` and never holds a query, and `file` never has a `/` before its
/// query, which is what makes the encoded form split back apart unambiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestPointer {
    Playlist { url: String },
    Segment { directory: String, file: String },
}

impl ManifestPointer {
    pub fn playlist(url: &Url) -> Self {
        Self::Playlist {
            url: url.to_string(),
        }
    }

    /// Splits an absolute segment url into a pointer. Segments on `origin` lose their domain.
    pub fn segment(target: &Url, origin: &Url) -> AppResult<Self> {
        let path = target.path();
        let (dir_path, name) = path.rsplit_once('/').unwrap_or(("", path));

        if name.is_empty() {
            return Err(Error::InvalidPointer(format!(
                "segment url has no file name: {}",
                target
            )));
        }

        let file = match target.query() {
            Some(query) => format!("{}?{}", name, query),
            None => name.to_string(),
        };

        let directory = if target.origin() == origin.origin() {
            dir_path.trim_start_matches('/').to_string()
        } else {
            format!("{}{}", target.origin().ascii_serialization(), dir_path)
        };

        Ok(Self::Segment { directory, file })
    }

    pub fn encode(&self) -> String {
        let raw = match self {
            Self::Playlist { url } => format!("{}{}", PLAYLIST_TAG, url),
            Self::Segment { directory, file } => format!("{}{}/{}", SEGMENT_TAG, directory, file),
        };

        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Never panics, anything that doesn't decode to a well formed pointer is rejected.
    pub fn decode(encoded: &str) -> AppResult<Self> {
        // some players re-pad or the value got copied out of an older playlist
        let trimmed = encoded.trim().trim_end_matches('=');
        if trimmed.is_empty() {
            return Err(Error::InvalidPointer("empty pointer".to_string()));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| Error::InvalidPointer(format!("bad base64: {}", e)))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| Error::InvalidPointer("pointer is not utf-8".to_string()))?;

        if let Some(url) = raw.strip_prefix(PLAYLIST_TAG) {
            let parsed = parse_http_url(url)?;
            // only accept the exact form encode would have produced
            if parsed.as_str() != url {
                return Err(Error::InvalidPointer("playlist url is not canonical".to_string()));
            }
            return Ok(Self::Playlist {
                url: url.to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix(SEGMENT_TAG) {
            let (path_part, query) = match rest.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (rest, None),
            };

            let (directory, name) = path_part
                .rsplit_once('/')
                .ok_or_else(|| Error::InvalidPointer("segment pointer has no separator".to_string()))?;

            if name.is_empty() {
                return Err(Error::InvalidPointer("segment pointer has no file".to_string()));
            }

            let file = match query {
                Some(query) => format!("{}?{}", name, query),
                None => name.to_string(),
            };

            return Ok(Self::Segment {
                directory: directory.to_string(),
                file,
            });
        }

        Err(Error::InvalidPointer("unknown pointer kind".to_string()))
    }

    /// Absolute url this pointer stands for, relative segment directories hang off `origin`.
    pub fn resolve(&self, origin: &Url) -> AppResult<Url> {
        match self {
            Self::Playlist { url } => parse_http_url(url),
            Self::Segment { directory, file } if is_absolute_http(directory) => {
                parse_http_url(&format!("{}/{}", directory, file))
            }
            Self::Segment { directory, file } => {
                let path = if directory.is_empty() {
                    format!("/{}", file)
                } else {
                    format!("/{}/{}", directory, file)
                };
                origin
                    .join(&path)
                    .map_err(|e| Error::InvalidPointer(format!("can't resolve segment: {}", e)))
            }
        }
    }

    pub fn is_playlist(&self) -> bool {
        matches!(self, Self::Playlist { .. })
    }
}

pub fn is_absolute_http(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn parse_http_url(value: &str) -> AppResult<Url> {
    let url = Url::parse(value).map_err(|e| Error::InvalidPointer(format!("bad url: {}", e)))?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(Error::InvalidPointer(format!("not an http url: {}", value))),
    }
}

/// The absolute directory (no trailing slash) a url lives in, used to scope grants.
pub fn directory_of(url: &Url) -> String {
    let path = url.path();
    let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    format!("{}{}", url.origin().ascii_serialization(), dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://origin").unwrap()
    }

    #[test]
    fn segment_on_origin_drops_the_domain() {
        let target = Url::parse("https://origin/a/b/seg1.ts?x=1").unwrap();
        let pointer = ManifestPointer::segment(&target, &origin()).unwrap();

        assert_eq!(
            pointer,
            ManifestPointer::Segment {
                directory: "a/b".to_string(),
                file: "seg1.ts?x=1".to_string(),
            }
        );

        let raw = String::from_utf8(URL_SAFE_NO_PAD.decode(pointer.encode()).unwrap()).unwrap();
        assert_eq!(raw, "s:a/b/seg1.ts?x=1");
        assert_eq!(pointer.resolve(&origin()).unwrap(), target);
    }

    #[test]
    fn segment_elsewhere_keeps_its_host() {
        let target = Url::parse("http://cdn.example:8080/live/seg.ts").unwrap();
        let pointer = ManifestPointer::segment(&target, &origin()).unwrap();

        assert_eq!(
            pointer,
            ManifestPointer::Segment {
                directory: "http://cdn.example:8080/live".to_string(),
                file: "seg.ts".to_string(),
            }
        );
        assert_eq!(pointer.resolve(&origin()).unwrap(), target);
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let pointers = [
            ManifestPointer::Playlist {
                url: "https://origin/live/index.m3u8?token=a/b".to_string(),
            },
            ManifestPointer::Segment {
                directory: String::new(),
                file: "seg.ts".to_string(),
            },
            ManifestPointer::Segment {
                directory: "a/b".to_string(),
                file: "seg.ts?sig=x/y&t=1".to_string(),
            },
            ManifestPointer::Segment {
                directory: "https://cdn.example/x".to_string(),
                file: "seg-0001.ts".to_string(),
            },
        ];

        for pointer in pointers {
            assert_eq!(ManifestPointer::decode(&pointer.encode()).unwrap(), pointer);
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        let bad: [&str; 9] = [
            "",
            "!!!",
            "%%%",
            "aGVsbG8",                            // "hello"
            &URL_SAFE_NO_PAD.encode("p:not a url"),
            &URL_SAFE_NO_PAD.encode("p:ftp://host/x"),
            &URL_SAFE_NO_PAD.encode("s:noseparator"),
            &URL_SAFE_NO_PAD.encode("s:a/b/"),
            &URL_SAFE_NO_PAD.encode([0xffu8, 0xfe]),
        ];

        for value in bad {
            assert!(
                matches!(ManifestPointer::decode(value), Err(Error::InvalidPointer(_))),
                "expected rejection for {:?}",
                value
            );
        }
    }

    #[test]
    fn directory_of_strips_the_file() {
        let url = Url::parse("https://origin/a/b/index.m3u8?x=1").unwrap();
        assert_eq!(directory_of(&url), "https://origin/a/b");
    }
}
