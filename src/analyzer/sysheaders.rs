// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: analyzer :: sysheaders  —  §4.2.3 system-header allowlist
// ─────────────────────────────────────────────────────────────────────────────

const ARDUINO_CORE_HEADERS: &[&str] = &[
    "Arduino.h", "WString.h", "Print.h", "Printable.h", "Stream.h",
    "HardwareSerial.h", "Client.h", "Server.h", "Udp.h", "IPAddress.h",
    "wiring_private.h", "pins_arduino.h", "USBAPI.h", "Tone.h",
];

const CPP_STD_HEADERS: &[&str] = &[
    "vector", "map", "set", "string", "algorithm", "memory", "functional",
    "array", "cstdint", "cstdio", "cstdlib", "cstring", "cmath", "type_traits",
    "utility", "initializer_list", "new", "atomic",
];

const C_STD_HEADERS: &[&str] = &[
    "stdio.h", "stdlib.h", "string.h", "math.h", "stdint.h", "stdbool.h",
    "ctype.h", "stddef.h", "limits.h", "assert.h", "inttypes.h", "time.h",
];

const ALLOW_PREFIXES: &[&str] = &[
    "avr/", "util/",
    "esp_", "driver/", "soc/", "freertos/", "esp32/", "esp8266/", "hal/",
    "cmsis", "core_cm",
];

/// Whether `header` is a system/toolchain header that should never be
/// resolved against the library map (§4.2.3).
pub fn is_system_header(header: &str) -> bool {
    ARDUINO_CORE_HEADERS.contains(&header)
        || CPP_STD_HEADERS.contains(&header)
        || C_STD_HEADERS.contains(&header)
        || ALLOW_PREFIXES.iter().any(|p| header.starts_with(p))
}

/// Directory names that mark an architecture-specific subtree (§4.2.4).
pub const KNOWN_ARCHITECTURES: &[&str] = &[
    "avr", "megaavr", "samd", "stm32f4", "renesas", "sam", "nrf52", "mbed", "xmc",
];
