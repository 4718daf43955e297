//! M3U playlist rendering shared by the direct, lane and ADB emitters.

/// One playlist entry: an `#EXTINF` line plus its stream URL.
#[derive(Debug, Clone)]
pub struct M3uEntry {
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: Option<String>,
    pub tvg_chno: Option<i32>,
    pub group_title: Option<String>,
    pub display_name: String,
    pub stream_url: String,
}

/// Render a complete playlist. Entries appear in input order.
pub fn render_m3u(entries: &[M3uEntry]) -> String {
    let estimated = 50 + entries.len() * 220;
    let mut output = String::with_capacity(estimated);

    output.push_str("#EXTM3U\n");
    for entry in entries {
        push_entry(&mut output, entry);
    }
    output
}

fn push_entry(output: &mut String, entry: &M3uEntry) {
    output.push_str(&format!(
        "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\"",
        escape_m3u_attribute(&entry.tvg_id),
        escape_m3u_attribute(&entry.tvg_name)
    ));

    if let Some(ref logo) = entry.tvg_logo {
        output.push_str(&format!(" tvg-logo=\"{}\"", escape_m3u_attribute(logo)));
    }
    if let Some(chno) = entry.tvg_chno {
        output.push_str(&format!(" tvg-chno=\"{}\"", chno));
    }
    if let Some(ref group) = entry.group_title {
        output.push_str(&format!(" group-title=\"{}\"", escape_m3u_attribute(group)));
    }

    output.push_str(&format!(",{}\n", entry.display_name));
    output.push_str(&entry.stream_url);
    output.push('\n');
}

/// Escape double quotes and strip newlines in attribute values.
fn escape_m3u_attribute(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('\n', " ")
        .replace('\r', "")
}
