fn main() {
    // ESP-IDF link arguments and sysenv only matter for the device build.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
