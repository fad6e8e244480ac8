//! Best-effort extraction of addr-specs from an address-list header.
//!
//! We only want the `local@domain` part of each mailbox: display names,
//! comments and group names are discarded, entries that do not yield a
//! plausible address are dropped instead of failing the whole header.

/// Extract the addresses of an address-list (`From`, `To`, `Cc`...).
pub fn address_list(value: &str) -> Vec<String> {
    split_entries(value)
        .into_iter()
        .filter_map(|entry| {
            let addr = addr_spec(entry);
            if addr.is_none() && !entry.trim().is_empty() {
                tracing::trace!(entry = entry, "dropped malformed address");
            }
            addr
        })
        .collect()
}

/// The first address of a mailbox-list, `From` typically carries one.
pub fn first_address(value: &str) -> Option<String> {
    address_list(value).into_iter().next()
}

/// Split on commas that are outside of quoted strings, comments and
/// angle brackets. Group terminators `;` also end an entry.
fn split_entries(value: &str) -> Vec<&str> {
    let mut entries = vec![];
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    let mut comment = 0usize;
    let mut angle = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted || comment > 0 => escaped = true,
            '"' if comment == 0 => quoted = !quoted,
            '(' if !quoted => comment += 1,
            ')' if !quoted && comment > 0 => comment -= 1,
            '<' if !quoted && comment == 0 => angle = true,
            '>' if !quoted && comment == 0 => angle = false,
            ',' | ';' if !quoted && comment == 0 && !angle => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    entries.push(&value[start..]);
    entries
}

fn addr_spec(entry: &str) -> Option<String> {
    let entry = strip_comments(entry);
    let entry = strip_group_name(&entry);

    let candidate = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => &entry[open + 1..close],
        (Some(_), _) | (_, Some(_)) => return None,
        _ => entry,
    };

    // obsolete source route: <@relay1,@relay2:user@domain>
    let candidate = match candidate.trim().strip_prefix('@') {
        Some(route) => route.split_once(':')?.1,
        None => candidate,
    };

    let addr = candidate.trim();
    if is_plausible(addr) {
        Some(addr.to_string())
    } else {
        None
    }
}

pub(crate) fn strip_comments(entry: &str) -> String {
    let mut out = String::with_capacity(entry.len());
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    for c in entry.chars() {
        if escaped {
            escaped = false;
            if depth == 0 {
                out.push(c);
            }
            continue;
        }
        match c {
            '\\' if quoted || depth > 0 => {
                escaped = true;
                if depth == 0 {
                    out.push(c);
                }
            }
            '"' if depth == 0 => {
                quoted = !quoted;
                out.push(c);
            }
            '(' if !quoted => depth += 1,
            ')' if !quoted && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => (),
        }
    }
    out
}

/// `Friends: a@x` is the first entry of a group, drop the group name.
fn strip_group_name(entry: &str) -> &str {
    let mut quoted = false;
    for (i, c) in entry.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' | '@' if !quoted => return entry,
            ':' if !quoted => return &entry[i + 1..],
            _ => (),
        }
    }
    entry
}

fn is_plausible(addr: &str) -> bool {
    let Some((local, domain)) = addr.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }

    let local_ok = if local.len() >= 2 && local.starts_with('"') && local.ends_with('"') {
        true
    } else {
        !local.contains(|c: char| c.is_whitespace() || "\"(),:;<>@[\\]".contains(c))
    };
    let domain_ok = !domain.contains(|c: char| c.is_whitespace() || "\"(),:;<>@\\".contains(c))
        && !domain.starts_with('.')
        && !domain.ends_with('.');

    local_ok && domain_ok
}
