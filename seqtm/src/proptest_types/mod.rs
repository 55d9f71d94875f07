// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0
