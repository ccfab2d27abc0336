//! Audio-specific rewriting of the publisher offer

use crate::config::MigrationConfig;

const INBAND_FEC: &str = "useinbandfec=1";
const DTX: &str = "usedtx=1";

fn line_ending(sdp: &str) -> &'static str {
    if sdp.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Turn on Opus discontinuous transmission wherever in-band FEC is negotiated
pub fn enable_opus_dtx(sdp: &str) -> String {
    let ending = line_ending(sdp);
    sdp.split(ending)
        .map(|line| {
            if line.contains(INBAND_FEC) && !line.contains(DTX) {
                line.replacen(INBAND_FEC, &format!("{INBAND_FEC};{DTX}"), 1)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(ending)
}

fn red_payload_type(sdp: &str) -> Option<&str> {
    sdp.lines().find_map(|line| {
        let rest = line.strip_prefix("a=rtpmap:")?;
        let (payload_type, codec) = rest.split_once(' ')?;
        codec
            .to_ascii_lowercase()
            .starts_with("red/48000")
            .then_some(payload_type.trim())
    })
}

/// Move the RED payload type to the front of the audio media line
pub fn prefer_red_codec(sdp: &str) -> String {
    let Some(red) = red_payload_type(sdp) else {
        return sdp.to_string();
    };
    let ending = line_ending(sdp);
    sdp.split(ending)
        .map(|line| {
            let Some(rest) = line.strip_prefix("m=audio ") else {
                return line.to_string();
            };
            let fields: Vec<&str> = rest.split(' ').collect();
            // port, protocol, then payload types
            if fields.len() < 3 || !fields[2..].contains(&red) {
                return line.to_string();
            }
            let mut reordered: Vec<&str> = fields[..2].to_vec();
            reordered.push(red);
            reordered.extend(fields[2..].iter().filter(|pt| **pt != red));
            format!("m=audio {}", reordered.join(" "))
        })
        .collect::<Vec<_>>()
        .join(ending)
}

/// Apply the audio settings to an ICE-restart offer before it is set locally
pub fn rewrite_publisher_offer(sdp: &str, config: &MigrationConfig) -> String {
    let mut rewritten = sdp.to_string();
    if config.opus_dtx_enabled {
        rewritten = enable_opus_dtx(&rewritten);
    }
    if config.redundant_coding_enabled {
        rewritten = prefer_red_codec(&rewritten);
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SAMPLE_OFFER_SDP;

    #[test]
    fn test_dtx_appended_to_fec_line() {
        let rewritten = enable_opus_dtx(SAMPLE_OFFER_SDP);
        assert!(rewritten.contains("a=fmtp:111 minptime=10;useinbandfec=1;usedtx=1\r\n"));
        assert_eq!(enable_opus_dtx(&rewritten), rewritten);
    }

    #[test]
    fn test_red_moved_to_front() {
        let rewritten = prefer_red_codec(SAMPLE_OFFER_SDP);
        assert!(rewritten.contains("m=audio 9 UDP/TLS/RTP/SAVPF 63 111 0\r\n"));
        assert!(rewritten.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n"));
    }

    #[test]
    fn test_without_red_unchanged() {
        let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 111\na=rtpmap:111 opus/48000/2\n";
        assert_eq!(prefer_red_codec(sdp), sdp);
    }

    #[test]
    fn test_rewrite_follows_config() {
        let disabled = MigrationConfig {
            opus_dtx_enabled: false,
            redundant_coding_enabled: false,
        };
        assert_eq!(rewrite_publisher_offer(SAMPLE_OFFER_SDP, &disabled), SAMPLE_OFFER_SDP);

        let both = MigrationConfig {
            opus_dtx_enabled: true,
            redundant_coding_enabled: true,
        };
        let rewritten = rewrite_publisher_offer(SAMPLE_OFFER_SDP, &both);
        assert!(rewritten.contains("usedtx=1"));
        assert!(rewritten.contains("SAVPF 63 111 0"));
    }
}
