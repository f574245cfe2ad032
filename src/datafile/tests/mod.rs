mod tests_append_read;
mod tests_scan;
