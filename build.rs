fn main() {
    // Embedded sqlx migrations are read at compile time.
    println!("cargo:rerun-if-changed=migrations");
}
