/*!
Constructeurs d'arbres de capteurs

Produisent le JSON `{"Text", "Value", "Children"}` du moniteur matériel,
pour écrire des fixtures lisibles:

```
use symbion_relay_devkit::sensor_tree::{group, hardware, sensor, tree};

let data = tree(vec![hardware(
    "Intel Core i5-8400",
    vec![group("Load", vec![sensor("CPU Total", "37.2 %")])],
)]);
assert_eq!(data["Children"][0]["Text"], "Intel Core i5-8400");
```
*/

use serde_json::{json, Value};

/// Racine "Sensor" de l'arbre
pub fn tree(children: Vec<Value>) -> Value {
    node("Sensor", "", children)
}

/// Composant matériel (CPU, GPU, mémoire, carte mère...)
pub fn hardware(label: &str, children: Vec<Value>) -> Value {
    node(label, "", children)
}

/// Groupe de capteurs ("Temperatures", "Load", "Clocks"...)
pub fn group(label: &str, children: Vec<Value>) -> Value {
    node(label, "", children)
}

/// Capteur feuille avec sa valeur brute, unité comprise ("45.3 °C")
pub fn sensor(label: &str, value: &str) -> Value {
    json!({
        "Text": label,
        "Value": value,
        "Min": value,
        "Max": value,
        "Children": []
    })
}

fn node(label: &str, value: &str, children: Vec<Value>) -> Value {
    json!({
        "Text": label,
        "Value": value,
        "Children": children
    })
}

/// Machine de bureau typique: Ryzen + RTX 3070 + carte mère ASUS
///
/// Valeurs attendues: CPU 52.0 °C / 37.2 %, GPU 61.0 °C / 14.0 %, RAM 48.3 %
pub fn desktop_tree() -> Value {
    tree(vec![hardware(
        "DESKTOP-RELAY",
        vec![
            hardware(
                "ASUS PRIME B550-PLUS",
                vec![group(
                    "Temperatures",
                    vec![sensor("CPU", "45.0 °C"), sensor("Temperature #1", "34.0 °C")],
                )],
            ),
            hardware(
                "AMD Ryzen 7 5800X",
                vec![
                    group("Clocks", vec![sensor("Core #1", "4450.2 MHz")]),
                    group(
                        "Temperatures",
                        vec![
                            sensor("Core (Tctl/Tdie)", "52.0 °C"),
                            sensor("CCD #1 (Tdie)", "49.8 °C"),
                        ],
                    ),
                    group(
                        "Load",
                        vec![sensor("CPU Total", "37.2 %"), sensor("CPU Core #1", "41.0 %")],
                    ),
                ],
            ),
            hardware(
                "Generic Memory",
                vec![
                    group("Load", vec![sensor("Memory", "48.3 %")]),
                    group(
                        "Data",
                        vec![
                            sensor("Used Memory", "15.4 GB"),
                            sensor("Available Memory", "16.5 GB"),
                        ],
                    ),
                ],
            ),
            hardware(
                "NVIDIA GeForce RTX 3070",
                vec![
                    group("Temperatures", vec![sensor("GPU Core", "61.0 °C")]),
                    group(
                        "Load",
                        vec![
                            sensor("GPU Core", "14.0 %"),
                            sensor("GPU Memory Controller", "6.0 %"),
                        ],
                    ),
                ],
            ),
        ],
    )])
}
