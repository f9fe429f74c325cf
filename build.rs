use std::fs;
use std::io::Write;
use std::path::Path;

/// 扫描 migrations/ 下的 .sql 文件，生成 `SCHEMA_MIGRATIONS` 常量供 `migrate` 子命令使用。
fn main() {
    let migrations_dir = Path::new("migrations");
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR 未设置");
    let dest_path = Path::new(&out_dir).join("schema_migrations.rs");

    println!("cargo:rerun-if-changed=migrations/");

    let mut files: Vec<String> = match fs::read_dir(migrations_dir) {
        Ok(dir) => dir
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".sql"))
            .collect(),
        Err(_) => Vec::new(),
    };
    // 文件名前缀即版本号（001_, 002_ ...）
    files.sort();

    let entries: Vec<String> = files
        .iter()
        .map(|file_name| {
            let version = file_name.trim_end_matches(".sql");
            format!(
                "    (\"{version}\", include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/migrations/{file_name}\")))"
            )
        })
        .collect();

    let mut out = fs::File::create(&dest_path).expect("无法创建 schema_migrations.rs");
    writeln!(
        out,
        "/// 由 build.rs 生成：按版本排序的 (版本, SQL) 列表\n\
         pub const SCHEMA_MIGRATIONS: &[(&str, &str)] = &[\n{}\n];",
        entries.join(",\n")
    )
    .expect("无法写入 schema_migrations.rs");
}
