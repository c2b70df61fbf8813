use m3u8_rs::{MasterPlaylist, Playlist, VariantStream, parse_playlist_res};
use url::Url;

use crate::error::{DeliveryError, Result};

pub fn parse_master_playlist(bytes: &[u8]) -> Result<MasterPlaylist> {
    match parse_playlist_res(bytes) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(master),
        Ok(Playlist::MediaPlaylist(_)) => Err(DeliveryError::protocol(
            "expected a master playlist but got a media playlist",
        )),
        Err(e) => Err(DeliveryError::protocol(format!(
            "failed to parse master playlist: {e}"
        ))),
    }
}

/// The playable variant with the highest bandwidth, the earliest one on ties.
///
/// I-frame only variants are skipped.
pub fn select_variant(master: &MasterPlaylist) -> Option<&VariantStream> {
    master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .fold(None, |best: Option<&VariantStream>, v| match best {
            Some(b) if b.bandwidth >= v.bandwidth => Some(b),
            _ => Some(v),
        })
}

/// Resolve a variant URI next to the master playlist.
///
/// Relative URIs, including ones with a leading `/`, are placed in the
/// master playlist's directory rather than at the host root.
pub fn resolve_variant_url(master: &Url, variant: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(variant) {
        return Ok(absolute);
    }

    let mut base = master.clone();
    base.set_query(None);
    base.set_fragment(None);
    let base = base.as_str();
    let directory = match base.rfind('/') {
        Some(idx) => &base[..=idx],
        None => base,
    };

    let joined = format!("{directory}{}", variant.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| DeliveryError::invalid_url(joined.as_str(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=500,RESOLUTION=640x360
a.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1500,RESOLUTION=1280x720
b.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1500,RESOLUTION=1280x720
c.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=9000,URI=\"iframe.m3u8\"
";

    #[test]
    fn first_maximum_bandwidth_wins() {
        let master = parse_master_playlist(MASTER.as_bytes()).unwrap();
        let variant = select_variant(&master).unwrap();
        assert_eq!(variant.uri, "b.m3u8");
        assert_eq!(variant.bandwidth, 1500);
    }

    #[test]
    fn media_playlists_are_rejected() {
        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nseg0.ts\n";
        assert!(matches!(
            parse_master_playlist(media.as_bytes()),
            Err(DeliveryError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn variant_resolves_as_sibling() {
        let master =
            Url::parse("https://live.example/hls/lv1/master.m3u8?ht2_nicolive=token").unwrap();
        assert_eq!(
            resolve_variant_url(&master, "1/ts/playlist.m3u8?ht2=x")
                .unwrap()
                .as_str(),
            "https://live.example/hls/lv1/1/ts/playlist.m3u8?ht2=x"
        );
        assert_eq!(
            resolve_variant_url(&master, "/b.m3u8").unwrap().as_str(),
            "https://live.example/hls/lv1/b.m3u8"
        );
    }

    #[test]
    fn absolute_variant_is_kept() {
        let master = Url::parse("https://live.example/hls/master.m3u8").unwrap();
        assert_eq!(
            resolve_variant_url(&master, "https://cdn.example/v.m3u8")
                .unwrap()
                .as_str(),
            "https://cdn.example/v.m3u8"
        );
    }
}
