/// Number of samples held in each filter window. The final tap of the
/// symmetric 51-tap designs below never sees data.
pub(crate) const FILTER_LEN: usize = 50;

/// 51-tap FIR band-pass, roughly 900-2100 Hz at 48 kHz. Isolates the two
/// MSK tones ahead of the zero-crossing detector.
pub(crate) const FIR_BANDPASS_900_2100: [f32; 51] = [
    0.0003829, 0.0000483, -0.0003554, -0.0009058, -0.0016643, -0.0026639, -0.0038995, -0.0053223,
    -0.0068404, -0.0083243, -0.0096175, -0.0105523, -0.0109671, -0.0107252, -0.0097326, -0.0079517,
    -0.0054107, -0.0022065, 0.0014986, 0.0054883, 0.0095081, 0.0132861, 0.0165563, 0.0190822,
    0.0206773, 0.0212227, 0.0206773, 0.0190822, 0.0165563, 0.0132861, 0.0095081, 0.0054883,
    0.0014986, -0.0022065, -0.0054107, -0.0079517, -0.0097326, -0.0107252, -0.0109671, -0.0105523,
    -0.0096175, -0.0083243, -0.0068404, -0.0053223, -0.0038995, -0.0026639, -0.0016643, -0.0009058,
    -0.0003554, 0.0000483, 0.0003829,
];

/// 51-tap FIR low-pass, roughly 600 Hz at 48 kHz. Smooths the discriminator
/// pulse train into a sliceable level.
pub(crate) const FIR_LOWPASS_600: [f32; 51] = [
    0.0015393, 0.0017254, 0.0020791, 0.0026251, 0.0033837, 0.0043697, 0.0055914, 0.0070505,
    0.0087412, 0.0106507, 0.0127585, 0.0150375, 0.017454, 0.0199689, 0.022538, 0.0251141,
    0.0276471, 0.0300864, 0.0323815, 0.0344841, 0.0363486, 0.0379345, 0.0392064, 0.040136,
    0.0407023, 0.0408925, 0.0407023, 0.040136, 0.0392064, 0.0379345, 0.0363486, 0.0344841,
    0.0323815, 0.0300864, 0.0276471, 0.0251141, 0.022538, 0.0199689, 0.017454, 0.0150375,
    0.0127585, 0.0106507, 0.0087412, 0.0070505, 0.0055914, 0.0043697, 0.0033837, 0.0026251,
    0.0020791, 0.0017254, 0.0015393,
];
