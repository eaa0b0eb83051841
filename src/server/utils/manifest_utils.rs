use tracing::{debug, warn};
use url::Url;

use crate::server::error::{AppResult, Error};
use crate::server::utils::pointer_utils::ManifestPointer;

pub const PLAYLIST_MARKER: &str = "#EXTM3U";

/// anything containing one of these is treated as a media segment reference
const SEGMENT_MARKERS: [&str; 5] = [".ts", ".aac", ".m4s", ".mp4", ".m4a"];
const PLAYLIST_REFERENCE_MARKER: &str = ".m3u8";

pub struct RewriteContext<'a> {
    /// where the playlist itself was fetched from, relative lines resolve against it
    pub playlist_url: &'a Url,
    /// configured origin, segments there get domain-less pointers
    pub origin: &'a Url,
    /// what the player should call back, e.g. `/` or `https://proxy.example/`
    pub proxy_base: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenPlaylist {
    pub body: String,
    /// every pointer written into `body`, in line order
    pub pointers: Vec<ManifestPointer>,
}

enum LineKind {
    Segment,
    Playlist,
    Other,
}

fn classify(line: &str) -> LineKind {
    let lower = line.to_ascii_lowercase();

    if lower.contains(PLAYLIST_REFERENCE_MARKER) {
        LineKind::Playlist
    } else if SEGMENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        LineKind::Segment
    } else {
        LineKind::Other
    }
}

/// Rewrites with the standard pointer encoding.
pub fn rewrite_playlist(text: &str, ctx: &RewriteContext<'_>) -> AppResult<RewrittenPlaylist> {
    rewrite_playlist_with(text, ctx, ManifestPointer::encode)
}

/// Swaps every segment (and nested playlist) reference for a proxy url, everything else
/// including blank lines is written back untouched so line count and order hold.
pub fn rewrite_playlist_with<F>(
    text: &str,
    ctx: &RewriteContext<'_>,
    encode: F,
) -> AppResult<RewrittenPlaylist>
where
    F: Fn(&ManifestPointer) -> String,
{
    if !text.contains(PLAYLIST_MARKER) {
        return Err(Error::NotAPlaylist);
    }

    let mut pointers = Vec::new();

    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                return line.to_string();
            }

            let (param, kind) = match classify(trimmed) {
                LineKind::Segment => ("ts", LineKind::Segment),
                LineKind::Playlist => ("m3u8", LineKind::Playlist),
                LineKind::Other => return line.to_string(),
            };

            // join covers absolute, root-relative and directory-relative lines alike
            let resolved = match ctx.playlist_url.join(trimmed) {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Failed to resolve: {} - {}", trimmed, e);
                    return line.to_string();
                }
            };

            let pointer = match kind {
                LineKind::Playlist => ManifestPointer::playlist(&resolved),
                _ => match ManifestPointer::segment(&resolved, ctx.origin) {
                    Ok(pointer) => pointer,
                    Err(e) => {
                        warn!("Leaving segment line as is: {}", e);
                        return line.to_string();
                    }
                },
            };

            let rewritten = format!("{}?{}={}", ctx.proxy_base, param, encode(&pointer));
            pointers.push(pointer);
            rewritten
        })
        .collect();

    let mut body = lines.join("\n");
    if text.ends_with('\n') {
        body.push('\n');
    }

    debug!(
        "Rewrote playlist {} with {} pointers",
        ctx.playlist_url,
        pointers.len()
    );

    Ok(RewrittenPlaylist { body, pointers })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(text: &str) -> AppResult<RewrittenPlaylist> {
        let playlist_url = Url::parse("https://origin/a/b/index.m3u8").unwrap();
        let origin = Url::parse("https://origin").unwrap();
        let ctx = RewriteContext {
            playlist_url: &playlist_url,
            origin: &origin,
            proxy_base: "/",
        };
        rewrite_playlist(text, &ctx)
    }

    #[test]
    fn rewrites_relative_segments_in_order() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.ts\nseg2.ts\nseg3.ts\n";
        let result = rewrite(text).unwrap();

        let lines: Vec<&str> = result.body.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-TARGETDURATION:6");
        for (line, pointer) in lines[2..].iter().zip(&result.pointers) {
            assert_eq!(*line, format!("/?ts={}", pointer.encode()));
        }
        assert_eq!(
            result.pointers[1],
            ManifestPointer::Segment {
                directory: "a/b".to_string(),
                file: "seg2.ts".to_string(),
            }
        );
        assert!(result.body.ends_with('\n'));
    }

    #[test]
    fn every_reference_style_resolves_to_the_same_pointer() {
        let text = "#EXTM3U\nseg1.ts\n/a/b/seg1.ts\nhttps://origin/a/b/seg1.ts\n";
        let result = rewrite(text).unwrap();

        assert_eq!(result.pointers.len(), 3);
        assert_eq!(result.pointers[0], result.pointers[1]);
        assert_eq!(result.pointers[1], result.pointers[2]);
    }

    #[test]
    fn keeps_blank_and_unknown_lines() {
        let text = "#EXTM3U\r\n\r\n#EXTINF:6,\r\nseg.ts\r\nsomething-else\r\n";
        let result = rewrite(text).unwrap();

        let lines: Vec<&str> = result.body.lines().collect();
        assert_eq!(lines.len(), text.lines().count());
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "#EXTINF:6,");
        assert!(lines[3].starts_with("/?ts="));
        assert_eq!(lines[4], "something-else");
    }

    #[test]
    fn nested_playlists_become_playlist_pointers() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n";
        let result = rewrite(text).unwrap();

        assert_eq!(
            result.pointers,
            vec![ManifestPointer::Playlist {
                url: "https://origin/a/b/low/index.m3u8".to_string(),
            }]
        );
        assert!(result.body.contains("/?m3u8="));
    }

    #[test]
    fn missing_marker_is_not_a_playlist() {
        assert_eq!(rewrite("<html>nope</html>"), Err(Error::NotAPlaylist));
        assert_eq!(rewrite(""), Err(Error::NotAPlaylist));
    }

    #[test]
    fn custom_encoder_is_used() {
        let playlist_url = Url::parse("https://origin/live/index.m3u8").unwrap();
        let origin = Url::parse("https://origin").unwrap();
        let ctx = RewriteContext {
            playlist_url: &playlist_url,
            origin: &origin,
            proxy_base: "https://proxy.example/",
        };

        let result = rewrite_playlist_with("#EXTM3U\nseg.ts", &ctx, |_| "X".to_string()).unwrap();
        assert_eq!(result.body, "#EXTM3U\nhttps://proxy.example/?ts=X");
    }
}
