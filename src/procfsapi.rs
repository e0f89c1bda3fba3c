// Abstraction to the directory tree below /proc, implemented differently by the real system and
// by test harnesses.

pub trait ProcfsAPI {
    // Open /proc/<path> (which can have multiple path elements, eg, {PID}/filename), read it, and
    // return its entire contents as a string.  Return a sensible error message if the file can't
    // be opened or read.
    fn read_to_string(&self, path: &str) -> Result<String, String>;

    // Return the pid of every numerically-named entry of /proc.  Return a sensible error message
    // in case something goes really, really wrong, but otherwise try to make the best of it.
    fn read_proc_pids(&self) -> Result<Vec<i32>, String>;
}

pub fn parse_u64_field(
    fields: &[&str],
    ix: usize,
    line: &str,
    file: &str,
    pid: i32,
    fieldname: &str,
) -> Result<u64, String> {
    // pid 0 means a system-wide file such as /proc/stat, not a per-process one.
    if ix >= fields.len() {
        if pid == 0 {
            return Err(format!("Index out of range for /proc/{file}: {ix}: {line}"));
        } else {
            return Err(format!(
                "Index out of range for /proc/{pid}/{file}: {ix}: {line}"
            ));
        }
    }
    if let Ok(n) = fields[ix].parse::<u64>() {
        return Ok(n);
    }
    if fields[ix] == "-1" {
        // Special "no data" value seen in some fields of zombie and dead processes, we just fold
        // it to zero.
        return Ok(0);
    }
    if pid == 0 {
        Err(format!(
            "Could not parse {fieldname} in /proc/{file}: {line}"
        ))
    } else {
        Err(format!(
            "Could not parse {fieldname} from /proc/{pid}/{file}: {line}"
        ))
    }
}

#[test]
pub fn parse_u64_field_test() {
    let xs = ["37", "-1", "42", "blorp"];
    assert!(parse_u64_field(&xs, 0, "", "stat", 1, "x").unwrap() == 37);
    assert!(parse_u64_field(&xs, 1, "", "stat", 1, "x").unwrap() == 0);
    assert!(parse_u64_field(&xs, 2, "", "stat", 1, "x").unwrap() == 42);
    assert!(parse_u64_field(&xs, 3, "", "stat", 1, "x").is_err());
    assert!(parse_u64_field(&xs, 4, "", "stat", 1, "x").is_err());
}
